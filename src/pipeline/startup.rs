//! Acquiring the hub, the model and the frame source ahead of a session.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::watch;
use tracing::info;

use super::scheduler::{cancelled, disconnect_messenger};
use crate::{camera::FrameSource, hub::Messenger, impulse::Detector};

pub enum Startup<M, D, S> {
    Ready {
        messenger: Arc<M>,
        detector: D,
        source: S,
    },
    Cancelled,
}

/// Connects, starts the model and opens the frame source, in that order.
///
/// Each step races `cancel`. When a step fails or cancellation wins, everything acquired
/// by earlier steps is released before returning. `start` yields the model's labels,
/// which are handed to `open`.
pub async fn acquire<M, D, S, E, CM, FM, CD, FD, CS, FS>(
    cancel: &mut watch::Receiver<bool>,
    disconnect_timeout: Duration,
    connect: CM,
    start: CD,
    open: CS,
) -> Result<Startup<M, D, S>, E>
where
    M: Messenger,
    D: Detector,
    S: FrameSource,
    CM: FnOnce() -> FM,
    FM: Future<Output = Result<Arc<M>, E>>,
    CD: FnOnce() -> FD,
    FD: Future<Output = Result<(D, Vec<String>), E>>,
    CS: FnOnce(Vec<String>) -> FS,
    FS: Future<Output = Result<S, E>>,
{
    let messenger = match unless_cancelled(cancel, connect()).await {
        Some(connected) => connected?,
        None => return abandon(None::<Result<(), E>>),
    };

    let (mut detector, labels) = match unless_cancelled(cancel, start()).await {
        Some(Ok(started)) => started,
        step => {
            disconnect_messenger(messenger.as_ref(), disconnect_timeout).await;
            return abandon(step);
        }
    };

    let source = match unless_cancelled(cancel, open(labels)).await {
        Some(Ok(source)) => source,
        step => {
            detector.stop().await;
            disconnect_messenger(messenger.as_ref(), disconnect_timeout).await;
            return abandon(step);
        }
    };

    Ok(Startup::Ready {
        messenger,
        detector,
        source,
    })
}

async fn unless_cancelled<F: Future>(
    cancel: &mut watch::Receiver<bool>,
    step: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancelled(cancel) => None,
        output = step => Some(output),
    }
}

fn abandon<T, M, D, S, E>(step: Option<Result<T, E>>) -> Result<Startup<M, D, S>, E> {
    match step {
        Some(Err(e)) => Err(e),
        _ => {
            info!("Interrupted during startup");
            Ok(Startup::Cancelled)
        }
    }
}
