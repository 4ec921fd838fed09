use std::sync::{Mutex, PoisonError};
use std::thread;

use crossbeam_channel::{select, unbounded, Receiver, Sender, TryRecvError};
use log::{error, info};

use crate::devices::Devices;
use crate::dispatch::Dispatch;
use crate::mram_image::IndexImage;
use crate::platform::Platform;
use crate::rank_pipeline::{load_mram_dpu, run_on_dpu, PassId, RankContext, TimesCtx};
use crate::result_collector::{RankResults, ResultCollector};
use crate::upvc_err::{Result, UpvcError};

/// Stops every wait of a run once any thread hits a fatal error, and keeps
/// that first error.
pub struct RunAbort {
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
    cause: Mutex<Option<UpvcError>>,
}

impl Default for RunAbort {
    fn default() -> Self {
        RunAbort::new()
    }
}

impl RunAbort {
    pub fn new() -> RunAbort {
        // nothing is ever sent: dropping the sender is the signal
        let (trigger, signal) = unbounded();
        RunAbort {
            trigger: Mutex::new(Some(trigger)),
            signal,
            cause: Mutex::new(None),
        }
    }
    pub fn fail(&self, err: UpvcError) {
        let mut cause = self.cause.lock().unwrap_or_else(PoisonError::into_inner);
        if cause.is_none() {
            error!("aborting run: {}", err);
            *cause = Some(err);
        }
        self.trigger.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
    pub fn is_aborted(&self) -> bool {
        matches!(self.signal.try_recv(), Err(TryRecvError::Disconnected))
    }
    pub fn into_cause(self) -> Option<UpvcError> {
        self.cause.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Counting handoff between pipeline stages.
pub struct HandoffSignal {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl HandoffSignal {
    pub fn new(permits: usize) -> Result<HandoffSignal> {
        let (tx, rx) = unbounded();
        for _ in 0..permits {
            tx.send(())?;
        }
        Ok(HandoffSignal { tx, rx })
    }
    pub fn post(&self) -> Result<()> {
        self.tx.send(())?;
        Ok(())
    }
    /// Takes one permit, blocking until one is posted or the run aborts.
    pub fn wait(&self, abort: &RunAbort) -> Result<()> {
        if abort.is_aborted() {
            return Err(UpvcError::Aborted);
        }
        select! {
            recv(self.rx) -> permit => {
                permit?;
                Ok(())
            }
            recv(abort.signal) -> _ => Err(UpvcError::Aborted),
        }
    }
}

/// Where a round sits in the global unit numbering and how big its read
/// neighbourhoods are.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Round {
    pub round: u32,
    pub dpu_offset: usize,
    pub size_neighbour_in_bytes: usize,
}

fn dispatch_passes<F>(
    round: &Round,
    nb_ranks: usize,
    dispatch: &Mutex<Dispatch>,
    dispatch_free: &HandoffSignal,
    abort: &RunAbort,
    ready: Vec<Sender<PassId>>,
    mut fill: F,
) -> Result<u32>
where
    F: FnMut(u32, &mut Dispatch) -> Result<bool>,
{
    let mut pass = 0;
    loop {
        // every rank must be done with the previous pass's staging buffers
        for _ in 0..nb_ranks {
            dispatch_free.wait(abort)?;
        }
        let more = {
            let mut dispatch = dispatch.lock()?;
            dispatch.clear();
            fill(pass, &mut dispatch)?
        };
        if !more {
            return Ok(pass);
        }
        let id = PassId {
            round: round.round,
            pass,
            dpu_offset: round.dpu_offset,
        };
        for tx in ready.iter() {
            tx.send(id)?;
        }
        pass += 1;
    }
}

/// Runs every pass of a round over all ranks and returns how many passes ran.
///
/// `images` holds one reference index per unit of the run and is loaded
/// first. `fill` stages the reads of pass `n` into the shared dispatch and
/// returns `false` when there are none left; it runs on the calling thread.
/// Each rank runs its passes on its own thread, and `consume` receives every
/// rank's results on an accumulator thread, in completion order. The first
/// fatal error anywhere stops the whole round and is returned.
pub fn run_round<P, F, C>(
    devices: &Devices<P>,
    round: &Round,
    images: &[IndexImage],
    times: &TimesCtx,
    fill: F,
    mut consume: C,
) -> Result<u32>
where
    P: Platform,
    F: FnMut(u32, &mut Dispatch) -> Result<bool>,
    C: FnMut(RankResults) -> Result<()> + Send,
{
    let nb_ranks = devices.nb_ranks();
    if images.len() != devices.nb_dpus() {
        return Err(UpvcError::Config(format!(
            "{} index images for a run of {} DPUs",
            images.len(),
            devices.nb_dpus()
        )));
    }
    for (rank_id, rank_images) in images.chunks(devices.nb_dpus_per_rank()).enumerate() {
        load_mram_dpu(devices, rank_id, round.dpu_offset, rank_images, times)?;
    }

    let collector = ResultCollector::new(devices.config());
    let dispatch = Mutex::new(Dispatch::new(devices.nb_dpus(), round.size_neighbour_in_bytes));
    let dispatch_free = HandoffSignal::new(nb_ranks)?;
    let acc_wait = HandoffSignal::new(1)?;
    let abort = RunAbort::new();
    let ctx = RankContext {
        devices,
        collector: &collector,
        dispatch: &dispatch,
        dispatch_free: &dispatch_free,
        acc_wait: &acc_wait,
        abort: &abort,
        times,
    };

    let (results_tx, results_rx) = unbounded::<RankResults>();
    let (ready_txs, ready_rxs): (Vec<Sender<PassId>>, Vec<Receiver<PassId>>) =
        (0..nb_ranks).map(|_| unbounded()).unzip();

    let nb_passes = thread::scope(|s| {
        let ctx = &ctx;
        let mut handles = Vec::with_capacity(nb_ranks + 1);
        for (rank_id, ready) in ready_rxs.into_iter().enumerate() {
            let results_tx = results_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("rank-{}", rank_id))
                .spawn_scoped(s, move || {
                    let outcome: Result<()> = (|| {
                        for pass in ready.iter() {
                            if let Some(results) = run_on_dpu(ctx, pass, rank_id)? {
                                results_tx.send(results)?;
                            }
                        }
                        Ok(())
                    })();
                    if let Err(err) = outcome {
                        ctx.abort.fail(err);
                    }
                });
            match handle {
                Ok(handle) => handles.push(handle),
                Err(err) => ctx.abort.fail(err.into()),
            }
        }
        drop(results_tx);

        let accumulator = thread::Builder::new()
            .name("accumulator".to_string())
            .spawn_scoped(s, move || {
                let outcome: Result<()> = (|| {
                    for results in results_rx.iter() {
                        consume(results)?;
                        ctx.acc_wait.post()?;
                    }
                    Ok(())
                })();
                if let Err(err) = outcome {
                    ctx.abort.fail(err);
                }
            });
        match accumulator {
            Ok(handle) => handles.push(handle),
            Err(err) => ctx.abort.fail(err.into()),
        }

        let dispatched = dispatch_passes(round, nb_ranks, ctx.dispatch, ctx.dispatch_free, ctx.abort, ready_txs, fill);
        let nb_passes = match dispatched {
            Ok(nb_passes) => nb_passes,
            Err(err) => {
                ctx.abort.fail(err);
                0
            }
        };
        for handle in handles {
            if handle.join().is_err() {
                ctx.abort.fail(UpvcError::Transport("pipeline thread panicked".to_string()));
            }
        }
        nb_passes
    });

    if let Some(err) = abort.into_cause() {
        return Err(err);
    }
    info!("round {}: {} passes over {} ranks", round.round, nb_passes, nb_ranks);
    Ok(nb_passes)
}
