use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::routing::get;
use tokio::net::TcpListener;

#[derive(Clone)]
struct Fixture {
    status: StatusCode,
    body: Arc<Vec<u8>>,
    hits: Arc<AtomicUsize>,
    last_query: Arc<std::sync::Mutex<Option<String>>>,
}

/// A local HTTP server answering `GET /data` with a canned response.
pub(crate) struct FixtureServer {
    pub url: String,
    hits: Arc<AtomicUsize>,
    last_query: Arc<std::sync::Mutex<Option<String>>>,
}

impl FixtureServer {
    pub async fn start(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let last_query = Arc::new(std::sync::Mutex::new(None));
        let fixture = Fixture {
            status,
            body: Arc::new(body.into()),
            hits: Arc::clone(&hits),
            last_query: Arc::clone(&last_query),
        };

        let app = Router::new()
            .route("/data", get(serve_fixture))
            .with_state(fixture);
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fixture listener");
        let addr = listener.local_addr().expect("fixture address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fixture server");
        });

        Self {
            url: format!("http://{addr}/data"),
            hits,
            last_query,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn last_query(&self) -> Option<String> {
        self.last_query.lock().expect("query lock").clone()
    }
}

async fn serve_fixture(
    State(fixture): State<Fixture>,
    RawQuery(query): RawQuery,
) -> (StatusCode, Vec<u8>) {
    fixture.hits.fetch_add(1, Ordering::SeqCst);
    *fixture.last_query.lock().expect("query lock") = query;
    (fixture.status, fixture.body.as_ref().clone())
}

/// An address nothing listens on.
pub(crate) async fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind throwaway listener");
    let addr = listener.local_addr().expect("throwaway address");
    drop(listener);
    format!("http://{addr}/data")
}
