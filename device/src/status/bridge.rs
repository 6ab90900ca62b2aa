use crate::status::model::LatestFix;
use anyhow::Context;
use fixlink::telemetry::LinkMetrics;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use warp::Filter;

/// Read-only status routes: `GET /position` and `GET /metrics`.
pub fn routes(
    latest: LatestFix,
    metrics: Arc<LinkMetrics>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let latest_filter = warp::any().map(move || latest.clone());
    let metrics_filter = warp::any().map(move || metrics.clone());

    let position_route = warp::path("position")
        .and(warp::path::end())
        .and(warp::get())
        .and(latest_filter)
        .map(|latest: LatestFix| warp::reply::json(&latest.reply()));

    let metrics_route = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .and(metrics_filter)
        .map(|metrics: Arc<LinkMetrics>| warp::reply::json(&metrics.snapshot()));

    position_route
        .or(metrics_route)
        .with(warp::reply::with::header("Access-Control-Allow-Origin", "*"))
}

/// Binds the status view and serves it until `shutdown` flips or closes.
/// Returns the bound address.
pub fn serve(
    addr: SocketAddr,
    latest: LatestFix,
    metrics: Arc<LinkMetrics>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<SocketAddr> {
    let (bound, server) = warp::serve(routes(latest, metrics))
        .try_bind_with_graceful_shutdown(addr, async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .with_context(|| format!("binding the status view to {}", addr))?;
    tokio::spawn(server);
    log::info!("status view listening on http://{}", bound);
    Ok(bound)
}
