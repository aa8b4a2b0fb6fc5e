//! In-process stub upstreams for client tests

use axum::Router;

/// Serve `router` on an ephemeral local port and return its base URL
pub(crate) async fn spawn_stub(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub listener");
    let addr = listener.local_addr().expect("stub address");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("stub server");
    });

    format!("http://{}", addr)
}
