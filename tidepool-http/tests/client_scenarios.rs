//! End-to-end scenarios for the pooled client, driven through mock
//! providers on a paused clock inside a `LocalSet`.

mod support;

use std::future::Future;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

use support::{DnsOutcome, MockNetwork, ServerBehavior, TestProviders};
use tidepool_http::{
    DnsResponseCode, HttpClient, HttpClientConfig, HttpError, HttpRequest, StatsInspector,
};

fn ip(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

fn get(url: &str) -> HttpRequest {
    HttpRequest::get(url).expect("valid url").build()
}

async fn run_local<F: Future>(future: F) -> F::Output {
    tokio::task::LocalSet::new().run_until(future).await
}

struct Harness {
    providers: TestProviders,
    stats: Rc<StatsInspector>,
    client: HttpClient<TestProviders>,
}

fn harness(behavior: ServerBehavior, config: HttpClientConfig) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let providers = TestProviders::new(behavior);
    let stats = Rc::new(StatsInspector::new());
    let client = HttpClient::builder(providers.clone())
        .with_config(config)
        .with_inspector(stats.clone())
        .build();
    Harness {
        providers,
        stats,
        client,
    }
}

fn network(h: &Harness) -> &MockNetwork {
    &h.providers.network
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn keep_alive_reuse_dials_once() {
    run_local(async {
        let h = harness(
            ServerBehavior::keep_alive("hello"),
            HttpClientConfig::new().with_keep_alive_timeout(Duration::from_secs(30)),
        );
        h.providers.dns.insert("origin.test", vec![ip(1)]);

        let first = h
            .client
            .request(get("http://origin.test/"))
            .await
            .expect("first response");
        assert_eq!(first.status(), 200);
        assert_eq!(first.body().as_ref(), b"hello");
        assert_eq!(h.client.idle_connection_count(), 1);
        assert_eq!(h.client.busy_connection_count(), 0);

        let second = h
            .client
            .request(get("http://origin.test/"))
            .await
            .expect("second response");
        assert_eq!(second.status(), 200);

        assert_eq!(network(&h).dial_count(), 1);
        assert_eq!(h.stats.connects(), 1);
        assert_eq!(h.stats.responses(), 2);
        assert_eq!(h.stats.active_requests(), 0);
        assert_eq!(h.client.idle_connection_count(), 1);
        let per_address = h.client.address_connections();
        let expected: std::net::SocketAddr = "10.0.0.1:80".parse().expect("addr");
        assert_eq!(per_address, vec![(expected, 1)]);

        h.client.stop().await;
        assert_eq!(h.client.connection_count(), 0);
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn idle_connection_expires_and_next_request_redials() {
    run_local(async {
        let h = harness(
            ServerBehavior::keep_alive("ok"),
            HttpClientConfig::new().with_keep_alive_timeout(Duration::from_millis(500)),
        );
        h.providers.dns.insert("origin.test", vec![ip(1)]);

        h.client
            .request(get("http://origin.test/"))
            .await
            .expect("response");
        assert_eq!(h.client.idle_connection_count(), 1);

        // Drive the reactor past the sweeper tick that follows the
        // keep-alive deadline.
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(h.client.idle_connection_count(), 0);
        assert_eq!(h.client.idle_expired_count(), 1);
        assert_eq!(h.client.connection_count(), 0);

        h.client
            .request(get("http://origin.test/"))
            .await
            .expect("response after expiry");
        assert_eq!(network(&h).dial_count(), 2);

        h.client.stop().await;
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn stalled_peer_trips_the_active_deadline() {
    run_local(async {
        let h = harness(
            ServerBehavior::Stall,
            HttpClientConfig::new().with_read_write_timeout(Duration::from_millis(200)),
        );
        h.providers.dns.insert("tarpit.test", vec![ip(1)]);

        let before = tokio::time::Instant::now();
        let error = h
            .client
            .request(get("http://tarpit.test/"))
            .await
            .expect_err("stalled request must fail");
        let elapsed = before.elapsed();

        assert!(matches!(error, HttpError::ReadTimeout), "got {:?}", error);
        assert!(
            elapsed >= Duration::from_millis(200) && elapsed <= Duration::from_millis(1200),
            "deadline fired after {:?}",
            elapsed
        );
        assert_eq!(h.client.busy_expired_count(), 1);
        assert_eq!(h.client.connection_count(), 0);
        assert_eq!(h.stats.http_timeouts(), 1);
        // Timeouts are not counted as response errors.
        assert_eq!(h.stats.response_errors(), 0);
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn round_robin_cycles_the_a_records() {
    run_local(async {
        // Keep-alive disabled: every request dials.
        let h = harness(
            ServerBehavior::close_after_each("ok"),
            HttpClientConfig::new(),
        );
        h.providers
            .dns
            .insert("balanced.test", vec![ip(1), ip(2), ip(3)]);

        for _ in 0..6 {
            h.client
                .request(get("http://balanced.test/"))
                .await
                .expect("response");
        }

        let dialed: Vec<Ipv4Addr> = network(&h)
            .dials()
            .iter()
            .map(|addr| match addr.ip() {
                std::net::IpAddr::V4(v4) => v4,
                std::net::IpAddr::V6(_) => panic!("unexpected v6 dial"),
            })
            .collect();
        assert_eq!(dialed, vec![ip(1), ip(2), ip(3), ip(1), ip(2), ip(3)]);

        // N requests over k addresses: each dialed N/k times.
        for target in [ip(1), ip(2), ip(3)] {
            assert_eq!(dialed.iter().filter(|&&d| d == target).count(), 2);
        }

        h.client.stop().await;
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn shutdown_closes_idle_now_and_waits_for_in_flight() {
    run_local(async {
        let h = harness(
            ServerBehavior::keep_alive("fast"),
            HttpClientConfig::new().with_keep_alive_timeout(Duration::from_secs(30)),
        );
        h.providers.dns.insert("a.test", vec![ip(1)]);
        h.providers.dns.insert("b.test", vec![ip(2)]);
        network(&h).set_behavior(
            "10.0.0.2:80".parse().expect("addr"),
            ServerBehavior::keep_alive("slow").with_delay(Duration::from_millis(300)),
        );

        // One parked connection plus one in-flight request.
        h.client
            .request(get("http://a.test/"))
            .await
            .expect("fast response");
        assert_eq!(h.client.idle_connection_count(), 1);

        let slow_client = h.client.clone();
        let in_flight =
            tokio::task::spawn_local(
                async move { slow_client.request(get("http://b.test/")).await },
            );
        tokio::task::yield_now().await;
        assert_eq!(h.client.busy_connection_count(), 1);

        let before = tokio::time::Instant::now();
        h.client.stop().await;
        let waited = before.elapsed();

        let response = in_flight
            .await
            .expect("join")
            .expect("in-flight response survives the drain");
        assert_eq!(response.body().as_ref(), b"slow");

        // The idle socket went down immediately; the shutdown future
        // waited for the slow response.
        assert!(waited >= Duration::from_millis(300), "waited {:?}", waited);
        assert_eq!(h.client.connection_count(), 0);
        assert_eq!(h.client.idle_connection_count(), 0);
        assert_eq!(h.stats.responses(), 2);

        // Requests after stop() are refused.
        let refused = h.client.request(get("http://a.test/")).await;
        assert!(matches!(refused, Err(HttpError::ShuttingDown)));
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn https_without_tls_context_fails_before_dialing() {
    run_local(async {
        let h = harness(ServerBehavior::keep_alive("ok"), HttpClientConfig::new());
        h.providers.dns.insert("secure.test", vec![ip(1)]);

        let error = h
            .client
            .request(get("https://secure.test/"))
            .await
            .expect_err("https without tls must fail");

        assert!(matches!(error, HttpError::MissingTlsContext));
        assert_eq!(network(&h).dial_count(), 0, "no dial may be attempted");
        // Pre-network failure: not a connect error.
        assert_eq!(h.stats.connect_errors(), 0);
        assert_eq!(h.stats.total_requests(), 1);
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn stop_without_traffic_completes_synchronously() {
    run_local(async {
        let h = harness(ServerBehavior::keep_alive("ok"), HttpClientConfig::new());

        h.client.start().await.expect("start");
        let before = tokio::time::Instant::now();
        h.client.stop().await;
        assert_eq!(before.elapsed(), Duration::ZERO);

        // A second stop is equivalent to the first.
        h.client.stop().await;
        assert_eq!(h.client.connection_count(), 0);
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn resolver_failures_route_to_the_right_errors() {
    run_local(async {
        let h = harness(ServerBehavior::keep_alive("ok"), HttpClientConfig::new());
        h.providers
            .dns
            .insert_outcome("down.test", DnsOutcome::Fail("resolver unreachable"));
        h.providers
            .dns
            .insert_outcome("missing.test", DnsOutcome::Negative(DnsResponseCode::NxDomain));

        let error = h
            .client
            .request(get("http://down.test/"))
            .await
            .expect_err("transport failure");
        assert!(matches!(error, HttpError::Resolve { .. }));
        assert_eq!(h.stats.resolve_errors(), 1);

        let error = h
            .client
            .request(get("http://missing.test/"))
            .await
            .expect_err("negative answer");
        assert!(matches!(
            error,
            HttpError::DnsQuery {
                code: DnsResponseCode::NxDomain,
                ..
            }
        ));
        // Negative answers are resolver responses, not resolver errors.
        assert_eq!(h.stats.resolve_errors(), 1);
        assert_eq!(network(&h).dial_count(), 0);
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn refused_dial_surfaces_a_connect_error() {
    run_local(async {
        let h = harness(ServerBehavior::Refuse, HttpClientConfig::new());
        h.providers.dns.insert("refusing.test", vec![ip(1)]);

        let error = h
            .client
            .request(get("http://refusing.test/"))
            .await
            .expect_err("refused dial");
        assert!(matches!(error, HttpError::Connect { .. }));
        assert_eq!(h.stats.connect_errors(), 1);
        assert_eq!(h.client.connection_count(), 0);
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn keep_alive_cap_retires_the_connection() {
    run_local(async {
        let h = harness(
            ServerBehavior::keep_alive("ok"),
            HttpClientConfig::new()
                .with_keep_alive_timeout(Duration::from_secs(30))
                .with_max_keep_alive_requests(2),
        );
        h.providers.dns.insert("capped.test", vec![ip(1)]);

        // The cap counts recycles: two parks, then the third response
        // retires the socket.
        for _ in 0..3 {
            h.client
                .request(get("http://capped.test/"))
                .await
                .expect("response");
        }
        assert_eq!(network(&h).dial_count(), 1);
        assert_eq!(h.client.idle_connection_count(), 0);

        h.client
            .request(get("http://capped.test/"))
            .await
            .expect("response on a fresh dial");
        assert_eq!(network(&h).dial_count(), 2);

        h.client.stop().await;
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn server_closing_an_idle_socket_is_quiet() {
    run_local(async {
        let h = harness(
            ServerBehavior::keep_alive_then_drop("once"),
            HttpClientConfig::new().with_keep_alive_timeout(Duration::from_secs(30)),
        );
        h.providers.dns.insert("flaky.test", vec![ip(1)]);

        h.client
            .request(get("http://flaky.test/"))
            .await
            .expect("response");

        // Let the parked connection observe the server's close.
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(h.client.idle_connection_count(), 0);
        assert_eq!(h.client.connection_count(), 0);
        // Not an error, not an expiry: the peer just went away.
        assert_eq!(h.stats.http_errors(), 0);
        assert_eq!(h.client.idle_expired_count(), 0);

        h.client
            .request(get("http://flaky.test/"))
            .await
            .expect("response on a fresh dial");
        assert_eq!(network(&h).dial_count(), 2);

        h.client.stop().await;
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn dropping_the_request_future_does_not_abort_the_exchange() {
    run_local(async {
        let h = harness(
            ServerBehavior::keep_alive("slowish").with_delay(Duration::from_millis(100)),
            HttpClientConfig::new().with_keep_alive_timeout(Duration::from_secs(30)),
        );
        h.providers.dns.insert("origin.test", vec![ip(1)]);

        let cancelled_client = h.client.clone();
        let cancelled = tokio::task::spawn_local(async move {
            cancelled_client.request(get("http://origin.test/")).await
        });
        tokio::task::yield_now().await;
        assert_eq!(h.client.busy_connection_count(), 1);
        cancelled.abort();

        // The exchange completes in the background and the connection
        // is still recycled.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.client.idle_connection_count(), 1);

        let reused = h
            .client
            .request(get("http://origin.test/"))
            .await
            .expect("reuse after cancellation");
        assert_eq!(reused.status(), 200);
        assert_eq!(network(&h).dial_count(), 1);

        h.client.stop().await;
    })
    .await;
}
