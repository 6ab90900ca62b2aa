//! Scan, connect and listen, rescanning whenever the tracker goes away.

use crate::config::ViewerConfig;
use fixlink::framing::{Dispatcher, Receiver};
use fixlink::link::{find_device, Central, Session};
use fixlink::telemetry::LinkMetrics;
use fixlink::FixRecord;
use log::{info, warn};
use std::future::Future;
use std::sync::Arc;
use tokio::time;

/// Why the viewer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Cancelled,
    DiscoveryTimeout,
}

enum Step<T> {
    Cancelled,
    Done(T),
}

/// How received fixes are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Consumer printing each fix to stdout.
pub fn printer(format: OutputFormat) -> impl FnMut(FixRecord) + Clone + Send + 'static {
    move |record: FixRecord| match format {
        OutputFormat::Text => println!("{}", describe(&record)),
        OutputFormat::Json => match serde_json::to_string(&record) {
            Ok(line) => println!("{}", line),
            Err(err) => warn!("cannot render fix as JSON: {}", err),
        },
    }
}

fn describe(record: &FixRecord) -> String {
    let mut line = format!(
        "Received GPS coordinates: lat {:.6}, lon {:.6}",
        record.latitude, record.longitude
    );
    if let Some(speed) = record.speed {
        line.push_str(&format!(", speed {:.1} m/s", speed));
    }
    if let Some(track) = record.track {
        line.push_str(&format!(", track {:.1} deg", track));
    }
    line.push_str(&format!(", at {}", record.timestamp));
    line
}

/// Runs the viewer until `shutdown` resolves or discovery times out.
///
/// Every session gets a fresh receiver, so a message cut off by a lost link
/// never leaks into the next one. Connection failures and lost links lead
/// back to scanning after one retry interval.
pub async fn run<C, F, S>(
    central: &mut C,
    config: &ViewerConfig,
    consumer: F,
    metrics: Arc<LinkMetrics>,
    shutdown: S,
) -> Exit
where
    C: Central,
    F: FnMut(FixRecord) + Clone + Send + 'static,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let name = config.link.device_name.as_str();

    loop {
        let found = tokio::select! {
            _ = &mut shutdown => Step::Cancelled,
            found = find_device(central, name, &config.scan) => Step::Done(found),
        };
        let device = match found {
            Step::Cancelled => return Exit::Cancelled,
            Step::Done(Some(device)) => device,
            Step::Done(None) => return Exit::DiscoveryTimeout,
        };

        let connected = tokio::select! {
            _ = &mut shutdown => Step::Cancelled,
            result = Session::connect(central, &device, config.connect_timeout()) => Step::Done(result),
        };
        let mut session = match connected {
            Step::Cancelled => return Exit::Cancelled,
            Step::Done(Ok(session)) => session,
            Step::Done(Err(err)) => {
                warn!("{}", err);
                if pause(&mut shutdown, config).await {
                    return Exit::Cancelled;
                }
                continue;
            }
        };

        let mut receiver = Receiver::new(
            &config.link,
            Dispatcher::new(consumer.clone()),
            metrics.clone(),
        );
        let subscribed = tokio::select! {
            _ = &mut shutdown => Step::Cancelled,
            result = session.subscribe(
                move |frame| receiver.on_notification(frame),
                config.subscribe_timeout(),
            ) => Step::Done(result),
        };
        match subscribed {
            Step::Cancelled => {
                session.disconnect().await;
                return Exit::Cancelled;
            }
            Step::Done(Ok(())) => info!("listening for fixes from {}", device.name),
            Step::Done(Err(err)) => {
                warn!("{}", err);
                session.disconnect().await;
                if pause(&mut shutdown, config).await {
                    return Exit::Cancelled;
                }
                continue;
            }
        }

        loop {
            let pumped = tokio::select! {
                _ = &mut shutdown => Step::Cancelled,
                result = session.pump() => Step::Done(result),
            };
            match pumped {
                Step::Cancelled => {
                    session.disconnect().await;
                    return Exit::Cancelled;
                }
                Step::Done(Ok(true)) => {}
                Step::Done(Ok(false)) => break,
                Step::Done(Err(err)) => {
                    warn!("{}", err);
                    break;
                }
            }
        }
        session.disconnect().await;
        info!("lost {}, scanning again", device.name);
    }
}

/// Waits one retry interval. Returns `true` if shutdown came first.
async fn pause<S>(shutdown: &mut std::pin::Pin<&mut S>, config: &ViewerConfig) -> bool
where
    S: Future<Output = ()>,
{
    tokio::select! {
        _ = shutdown.as_mut() => true,
        _ = time::sleep(config.scan.retry_interval()) => false,
    }
}
