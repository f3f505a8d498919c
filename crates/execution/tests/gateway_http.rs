//! End-to-end gateway behaviour against a local mock exchange.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{any, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use exgw_core::types::{
    CredentialStore, Credentials, ErrorKind, ExchangeId, NormalizedCommand, OperationKind,
    Timestamp,
};
use exgw_execution::exchanges::dialect_for;
use exgw_execution::{
    CallState, Dispatcher, Endpoint, FixedClock, Gateway, RecordingSleeper, RetryPolicy,
};

const NOW: u64 = 1_700_000_000_000;

struct Harness {
    server: MockServer,
    sleeper: Arc<RecordingSleeper>,
    clock: Arc<FixedClock>,
}

impl Harness {
    async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            sleeper: Arc::new(RecordingSleeper::new()),
            clock: Arc::new(FixedClock::new(Timestamp::from_millis(NOW))),
        }
    }

    fn gateway(&self, exchange: ExchangeId) -> Gateway {
        self.gateway_at(exchange, &self.server.uri(), Duration::from_secs(2))
    }

    fn gateway_at(&self, exchange: ExchangeId, base_url: &str, timeout: Duration) -> Gateway {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        };
        let credentials = CredentialStore::new()
            .with(ExchangeId::Binance, Credentials::new("bn-key", "bn-secret"))
            .with(ExchangeId::Mexc, Credentials::new("mx-key", "mx-secret"))
            .with(ExchangeId::Bybit, Credentials::new("by-key", "by-secret"))
            .with(
                ExchangeId::Bitget,
                Credentials::new("bg-key", "bg-secret").with_passphrase("bg-pass"),
            );
        Gateway::new(
            Dispatcher::new(policy).with_sleeper(self.sleeper.clone()),
            self.clock.clone(),
            Arc::new(credentials),
        )
        .with_dialect(dialect_for(
            exchange,
            Endpoint::new(base_url).with_timeout(timeout),
        ))
    }
}

fn binance_order(client_order_id: &str) -> NormalizedCommand {
    NormalizedCommand::new(ExchangeId::Binance, OperationKind::PlaceOrder)
        .with_param("symbol", "BTCUSDT")
        .with_param("side", "BUY")
        .with_param("type", "LIMIT")
        .with_param("quantity", "0.01")
        .with_param("price", "30000")
        .with_param("clientOrderId", client_order_id)
}

fn query_value(request: &Request, key: &str) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

#[tokio::test]
async fn missing_parameter_never_reaches_the_network() {
    let h = Harness::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    let mut cmd = binance_order("cl-1");
    cmd.params.remove("side");
    let outcome = h.gateway(ExchangeId::Binance).execute_detailed(&cmd).await;

    let err = outcome.result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadRequest);
    assert!(err.message.contains("`side`"));
    assert_eq!(outcome.dispatches, 0);
}

#[tokio::test]
async fn unsupported_operation_never_reaches_the_network() {
    let h = Harness::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    let cmd = NormalizedCommand::new(ExchangeId::Mexc, OperationKind::AmendOrder)
        .with_param("symbol", "BTCUSDT")
        .with_param("orderId", "1")
        .with_param("newQuantity", "2");
    let err = h.gateway(ExchangeId::Mexc).execute(&cmd).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::BadRequest);
}

#[tokio::test]
async fn exchange_info_is_filtered_by_symbol() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/exchangeInfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "timezone": "CST",
            "symbols": [
                {"symbol": "BTCUSDT", "status": "1", "baseAsset": "BTC"},
                {"symbol": "MXUSDT", "status": "1", "baseAsset": "MX"}
            ]
        })))
        .expect(3)
        .mount(&h.server)
        .await;
    let gw = h.gateway(ExchangeId::Mexc);

    let cmd = NormalizedCommand::new(ExchangeId::Mexc, OperationKind::GetExchangeInfo)
        .with_param("symbol", "mxusdt");
    let entry = gw.execute(&cmd).await.unwrap();
    assert_eq!(entry["baseAsset"], "MX");

    let cmd = cmd.with_param("symbol", "DOGEUSDT");
    let err = gw.execute(&cmd).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert_eq!(err.http_status, 404);
    assert_eq!(err.message, "Symbol not found");

    let all = NormalizedCommand::new(ExchangeId::Mexc, OperationKind::GetExchangeInfo);
    let info = gw.execute(&all).await.unwrap();
    assert_eq!(info["symbols"].as_array().unwrap().len(), 2);
}

/// Accepts each client order id once; the first acceptance is answered too
/// late for the caller to see it.
struct IdempotentOrderBook {
    accepted: Mutex<HashSet<String>>,
    slow_ack: Duration,
}

impl Respond for IdempotentOrderBook {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let id = query_value(request, "newClientOrderId").unwrap_or_default();
        let mut accepted = self.accepted.lock().unwrap();
        if accepted.insert(id.clone()) {
            ResponseTemplate::new(200)
                .set_body_json(json!({"symbol": "BTCUSDT", "orderId": 1, "clientOrderId": id}))
                .set_delay(self.slow_ack)
        } else {
            ResponseTemplate::new(400)
                .set_body_json(json!({"code": -2010, "msg": "Duplicate order sent."}))
        }
    }
}

#[tokio::test]
async fn ambiguous_write_is_not_retried_and_replay_is_rejected() {
    let h = Harness::start().await;
    let book = Arc::new(IdempotentOrderBook {
        accepted: Mutex::new(HashSet::new()),
        slow_ack: Duration::from_secs(2),
    });
    Mock::given(method("POST"))
        .and(path("/api/v3/order"))
        .respond_with(ArcResponder(book.clone()))
        .expect(2)
        .mount(&h.server)
        .await;
    let gw = h.gateway_at(
        ExchangeId::Binance,
        &h.server.uri(),
        Duration::from_millis(200),
    );

    let first = gw.execute_detailed(&binance_order("cl-42")).await;
    let err = first.result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::UpstreamUnavailable);
    assert!(err.message.contains("outcome unknown"));
    assert_eq!(first.dispatches, 1);
    assert!(h.sleeper.delays().is_empty());

    let second = gw.execute(&binance_order("cl-42")).await.unwrap_err();
    assert_eq!(second.kind, ErrorKind::BadRequest);
    assert!(second.message.contains("Duplicate"));

    assert_eq!(book.accepted.lock().unwrap().len(), 1);
}

/// Rejects timestamps behind the exchange clock.
struct SkewedExchange {
    server_time: u64,
    always_reject: bool,
}

impl Respond for SkewedExchange {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let ts: u64 = query_value(request, "timestamp")
            .and_then(|t| t.parse().ok())
            .unwrap_or_default();
        if self.always_reject || ts < self.server_time {
            ResponseTemplate::new(400).set_body_json(json!({
                "code": -1021,
                "msg": "Timestamp for this request is outside of the recvWindow."
            }))
        } else {
            ResponseTemplate::new(200)
                .set_body_json(json!({"symbol": "BTCUSDT", "orderId": 7, "status": "NEW"}))
        }
    }
}

#[tokio::test]
async fn clock_skew_refreshes_once_then_succeeds() {
    let h = Harness::start().await;
    let server_time = NOW + 3_000;
    Mock::given(method("GET"))
        .and(path("/api/v3/time"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"serverTime": server_time})))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v3/order"))
        .respond_with(SkewedExchange {
            server_time,
            always_reject: false,
        })
        .expect(2)
        .mount(&h.server)
        .await;
    let gw = h.gateway(ExchangeId::Binance);

    let outcome = gw.execute_detailed(&binance_order("cl-skew")).await;

    assert_eq!(outcome.result.unwrap()["status"], "NEW");
    assert_eq!(outcome.state, CallState::Succeeded);
    assert!(outcome.clock_refreshed);
    assert_eq!(outcome.dispatches, 2);
    assert_eq!(
        outcome.transitions,
        vec![
            CallState::Built,
            CallState::Dispatched,
            CallState::FailedRecoverable,
            CallState::Built,
            CallState::Dispatched,
            CallState::Succeeded,
        ]
    );
    assert_eq!(gw.clock_offset_ms(ExchangeId::Binance), 3_000);
}

#[tokio::test]
async fn persistent_clock_skew_surfaces_after_one_retry() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/time"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"serverTime": NOW})))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v3/order"))
        .respond_with(SkewedExchange {
            server_time: NOW,
            always_reject: true,
        })
        .expect(2)
        .mount(&h.server)
        .await;

    let outcome = h
        .gateway(ExchangeId::Binance)
        .execute_detailed(&binance_order("cl-skew"))
        .await;

    assert_eq!(outcome.result.unwrap_err().kind, ErrorKind::ClockSkew);
    assert_eq!(outcome.state, CallState::FailedTerminal);
    assert_eq!(outcome.dispatches, 2);
}

/// Throttles the first `throttled` calls, then succeeds.
struct Throttle {
    calls: AtomicUsize,
    throttled: usize,
}

impl Respond for Throttle {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.throttled {
            ResponseTemplate::new(200)
                .set_body_json(json!({"retCode": 10006, "retMsg": "Too many visits!", "result": {}}))
        } else {
            ResponseTemplate::new(200).set_body_json(json!({
                "retCode": 0,
                "retMsg": "OK",
                "result": {"category": "spot", "list": [{"symbol": "BTCUSDT", "lastPrice": "30000"}]},
                "time": NOW
            }))
        }
    }
}

#[tokio::test]
async fn throttling_is_retried_with_backoff() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .and(path("/v5/market/tickers"))
        .and(query_param("category", "spot"))
        .and(query_param("symbol", "BTCUSDT"))
        .respond_with(Throttle {
            calls: AtomicUsize::new(0),
            throttled: 2,
        })
        .expect(3)
        .mount(&h.server)
        .await;

    let cmd = NormalizedCommand::new(ExchangeId::Bybit, OperationKind::GetTicker)
        .with_param("symbol", "btcusdt");
    let outcome = h.gateway(ExchangeId::Bybit).execute_detailed(&cmd).await;

    let data = outcome.result.unwrap();
    assert_eq!(data["list"][0]["lastPrice"], "30000");
    assert_eq!(outcome.dispatches, 3);
    assert_eq!(
        outcome.transitions,
        vec![
            CallState::Built,
            CallState::Dispatched,
            CallState::FailedRecoverable,
            CallState::Dispatched,
            CallState::FailedRecoverable,
            CallState::Dispatched,
            CallState::Succeeded,
        ]
    );
    assert_eq!(
        h.sleeper.delays(),
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
}

#[tokio::test]
async fn bybit_forbidden_page_is_retried_then_rate_limited() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .and(path("/v5/market/tickers"))
        .respond_with(
            ResponseTemplate::new(403).set_body_string("<html>access too frequent</html>"),
        )
        .expect(3)
        .mount(&h.server)
        .await;

    let cmd = NormalizedCommand::new(ExchangeId::Bybit, OperationKind::GetTicker)
        .with_param("symbol", "BTCUSDT");
    let outcome = h.gateway(ExchangeId::Bybit).execute_detailed(&cmd).await;

    assert_eq!(outcome.result.unwrap_err().kind, ErrorKind::RateLimited);
    assert_eq!(outcome.dispatches, 3);
    assert_eq!(
        h.sleeper.delays(),
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
}

#[tokio::test]
async fn throttling_beyond_the_bound_is_rate_limited() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/24hr"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "1")
                .set_body_json(json!({"code": -1003, "msg": "Too many requests."})),
        )
        .expect(3)
        .mount(&h.server)
        .await;

    let cmd = NormalizedCommand::new(ExchangeId::Binance, OperationKind::GetTicker)
        .with_param("symbol", "BTCUSDT");
    let outcome = h.gateway(ExchangeId::Binance).execute_detailed(&cmd).await;

    let err = outcome.result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::RateLimited);
    assert_eq!(err.http_status, 429);
    assert_eq!(outcome.dispatches, 3);
    assert_eq!(
        h.sleeper.delays(),
        vec![Duration::from_secs(1), Duration::from_secs(1)]
    );
}

#[tokio::test]
async fn server_errors_retry_reads_but_not_writes() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ticker/24hr"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .expect(3)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v3/order"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .expect(1)
        .mount(&h.server)
        .await;
    let gw = h.gateway(ExchangeId::Binance);

    let read = NormalizedCommand::new(ExchangeId::Binance, OperationKind::GetTicker)
        .with_param("symbol", "BTCUSDT");
    let outcome = gw.execute_detailed(&read).await;
    assert_eq!(outcome.result.unwrap_err().kind, ErrorKind::UpstreamUnavailable);
    assert_eq!(outcome.dispatches, 3);

    let outcome = gw.execute_detailed(&binance_order("cl-5xx")).await;
    assert_eq!(outcome.result.unwrap_err().kind, ErrorKind::UpstreamUnavailable);
    assert_eq!(outcome.dispatches, 1);
}

#[tokio::test]
async fn refused_connection_is_retried_for_reads() {
    let h = Harness::start().await;
    let gw = h.gateway_at(
        ExchangeId::Binance,
        "http://127.0.0.1:1",
        Duration::from_secs(1),
    );
    let cmd = NormalizedCommand::new(ExchangeId::Binance, OperationKind::GetOrderBook)
        .with_param("symbol", "BTCUSDT");
    let outcome = gw.execute_detailed(&cmd).await;

    assert_eq!(outcome.result.unwrap_err().kind, ErrorKind::UpstreamUnavailable);
    assert_eq!(outcome.dispatches, 3);
    assert_eq!(h.sleeper.delays().len(), 2);
}

#[tokio::test]
async fn bitget_signed_request_carries_passphrase() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/spot/account/assets"))
        .and(header("ACCESS-KEY", "bg-key"))
        .and(header("ACCESS-PASSPHRASE", "bg-pass"))
        .and(header("ACCESS-TIMESTAMP", NOW.to_string().as_str()))
        .and(header_exists("ACCESS-SIGN"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "00000",
            "msg": "success",
            "requestTime": NOW,
            "data": [{"coin": "USDT", "available": "100"}]
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let cmd = NormalizedCommand::new(ExchangeId::Bitget, OperationKind::GetAccountBalance);
    let data = h.gateway(ExchangeId::Bitget).execute(&cmd).await.unwrap();
    assert_eq!(data[0]["coin"], "USDT");
}

#[tokio::test]
async fn bybit_auth_failure_is_terminal() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .and(path("/v5/account/wallet-balance"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "retCode": 10003,
            "retMsg": "API key is invalid.",
            "result": {},
            "time": NOW
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let cmd = NormalizedCommand::new(ExchangeId::Bybit, OperationKind::GetAccountBalance);
    let outcome = h.gateway(ExchangeId::Bybit).execute_detailed(&cmd).await;
    let err = outcome.result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::AuthFailure);
    assert_eq!(err.raw.unwrap()["retCode"], 10003);
    assert_eq!(outcome.dispatches, 1);
}

#[tokio::test]
async fn sync_clock_records_offset() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .and(path("/v5/market/time"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "retCode": 0,
            "retMsg": "OK",
            "result": {"timeSecond": "1699999999", "timeNano": "1699999999500000000"},
            "time": NOW - 500
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let gw = h.gateway(ExchangeId::Bybit);
    assert_eq!(gw.sync_clock(ExchangeId::Bybit).await.unwrap(), -500);
    assert_eq!(gw.clock_offset_ms(ExchangeId::Bybit), -500);
}

#[tokio::test]
async fn cancellation_abandons_a_slow_call() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/depth"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"bids": [], "asks": []}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&h.server)
        .await;
    let gw = h.gateway_at(ExchangeId::Binance, &h.server.uri(), Duration::from_secs(10));

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let cmd = NormalizedCommand::new(ExchangeId::Binance, OperationKind::GetOrderBook)
        .with_param("symbol", "BTCUSDT");
    let started = std::time::Instant::now();
    let err = gw.execute_until_cancelled(&cmd, &token).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::UpstreamUnavailable);
    assert!(started.elapsed() < Duration::from_secs(4));
}

/// Shares one responder between the mock and the test body.
struct ArcResponder<R>(Arc<R>);

impl<R: Respond> Respond for ArcResponder<R> {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.0.respond(request)
    }
}
