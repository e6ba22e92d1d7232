//! Token discovery: hot-plug polling, wait-for-token retry loops and the
//! parallel fan-out driver.
//!
//! Everything here is cooperative: no background threads, and every waiting
//! point observes the caller's [`CancellationToken`]. Cancelled waits
//! resolve to `Ok(None)`.
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::devices;
use crate::error::{Error, Result};
use crate::hid::{HidDeviceInfo, HidDeviceManager};
use crate::u2f::U2FAuthenticator;
use crate::usb::U2FHidToken;

/// Interval between enumeration passes while waiting for a token.
pub const ENUMERATION_POLL: Duration = Duration::from_millis(200);
/// How long a parallel round runs before rescanning for new tokens.
pub const PARALLEL_RECHECK: Duration = Duration::from_secs(5);
/// Interval between invalid-key-handle progress reports.
const PROGRESS_TICK: Duration = Duration::from_millis(500);

/// Enumerates, opens and INITs one device. `Ok(None)` covers both OS open
/// failures (permissions, unplug races) and tokens that cannot allocate a
/// channel right now; the poll loops try again later.
async fn try_open<I>(info: I) -> Result<Option<U2FHidToken<I::Device>>>
where
    I: HidDeviceInfo,
{
    let name = devices::product_name(info.vendor_id(), info.product_id());
    let device = match info.open().await {
        Ok(d) => d,
        Err(e) => {
            warn!("could not open HID device: {e}");
            return Ok(None);
        }
    };
    U2FHidToken::open(device, name).await
}

/// Polls until one plugged token opens a session. Returns `Ok(None)` when
/// cancelled first.
pub async fn wait_for_device<M>(
    manager: &M,
    cancel: &CancellationToken,
) -> Result<Option<U2FHidToken<M::Device>>>
where
    M: HidDeviceManager,
{
    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        for info in manager.get_devices().await? {
            if let Some(token) = try_open(info).await? {
                return Ok(Some(token));
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            _ = sleep(ENUMERATION_POLL) => {}
        }
    }
}

/// Polls until at least one token opens, then returns every token that
/// opened on that enumeration pass. Returns `Ok(None)` when cancelled first.
pub async fn wait_for_devices<M>(
    manager: &M,
    cancel: &CancellationToken,
) -> Result<Option<Vec<U2FHidToken<M::Device>>>>
where
    M: HidDeviceManager,
{
    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let mut tokens = Vec::new();
        for info in manager.get_devices().await? {
            if let Some(token) = try_open(info).await? {
                tokens.push(token);
            }
        }
        if !tokens.is_empty() {
            return Ok(Some(tokens));
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            _ = sleep(ENUMERATION_POLL) => {}
        }
    }
}

/// Waits for a token, runs `op` on it and releases it.
///
/// Transient failures (timeout, busy, interrupted IO) restart the wait from
/// scratch, riding out unplug/replug; anything else propagates. Returns
/// `Ok(None)` when cancelled.
pub async fn with_first_token<M, F, T>(
    manager: &M,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<Option<T>>
where
    M: HidDeviceManager,
    F: for<'a> FnMut(
        &'a mut U2FAuthenticator<M::Device>,
        &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Option<T>>>,
{
    loop {
        let token = match wait_for_device(manager, cancel).await? {
            Some(t) => t,
            None => return Ok(None),
        };
        let mut authenticator = U2FAuthenticator::new(token);
        let outcome = op(&mut authenticator, cancel).await;
        authenticator.close();
        match outcome {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() => {
                trace!("token failed transiently, rescanning: {e}");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Runs `op` concurrently against every plugged token until one produces a
/// result.
///
/// Each round opens every present token and spawns one worker per token,
/// cancelled by whichever of the caller's token or the round recheck timer
/// fires first. The first worker to return a value wins the round; workers
/// ending in transient failures or cancellation are ignored, invalid key
/// handles are counted and reported through `invalid_progress`, and any
/// other failure cancels the round and propagates. A round with no winner
/// restarts, picking up newly plugged tokens.
pub async fn run_parallel<M, F, T>(
    manager: &M,
    cancel: &CancellationToken,
    op: F,
    invalid_progress: Option<&mpsc::UnboundedSender<usize>>,
) -> Result<Option<T>>
where
    M: HidDeviceManager,
    F: for<'a> Fn(
        &'a mut U2FAuthenticator<M::Device>,
        &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Option<T>>>,
{
    loop {
        let tokens = match wait_for_devices(manager, cancel).await? {
            Some(t) => t,
            None => return Ok(None),
        };
        debug!("starting a round against {} token(s)", tokens.len());

        let round_cancel = cancel.child_token();
        let op = &op;
        let mut workers: FuturesUnordered<_> = tokens
            .into_iter()
            .map(|token| {
                let worker_cancel = round_cancel.clone();
                async move {
                    let mut authenticator = U2FAuthenticator::new(token);
                    let outcome = op(&mut authenticator, &worker_cancel).await;
                    authenticator.close();
                    outcome
                }
            })
            .collect();

        let recheck = sleep(PARALLEL_RECHECK);
        tokio::pin!(recheck);
        let mut progress_tick = interval_at(Instant::now() + PROGRESS_TICK, PROGRESS_TICK);

        let mut invalid_handles = 0;
        let winner = loop {
            tokio::select! {
                // Worker outcomes are drained ahead of the timers and the
                // caller's cancellation so that no completed result is lost.
                biased;
                outcome = workers.next() => match outcome {
                    // Every worker has finished without a winner; end the
                    // round so the rescan picks up newly plugged tokens.
                    None => break None,
                    Some(Ok(Some(v))) => break Some(v),
                    Some(Ok(None)) => {}
                    Some(Err(Error::InvalidKeyHandle)) => invalid_handles += 1,
                    Some(Err(e)) if e.is_transient() => {
                        trace!("token dropped out of the round: {e}");
                    }
                    Some(Err(e)) => {
                        round_cancel.cancel();
                        return Err(e);
                    }
                },
                _ = &mut recheck => break None,
                _ = progress_tick.tick() => {
                    if let Some(progress) = invalid_progress {
                        let _ = progress.send(invalid_handles);
                    }
                }
                _ = cancel.cancelled() => {
                    round_cancel.cancel();
                    if let Some(progress) = invalid_progress {
                        let _ = progress.send(invalid_handles);
                    }
                    return Ok(None);
                }
            }
        };

        round_cancel.cancel();
        if let Some(progress) = invalid_progress {
            let _ = progress.send(invalid_handles);
        }
        if let Some(v) = winner {
            return Ok(Some(v));
        }
    }
}
