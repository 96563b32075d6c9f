use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::conf::ApprovalSettings;
use crate::error::MdmResult;
use crate::modules::approval::engine::ApprovalEngine;

#[derive(Debug, Clone, Copy)]
enum Sweep {
    Expire,
    Remind,
}

impl Sweep {
    fn name(&self) -> &'static str {
        match self {
            Sweep::Expire => "expire",
            Sweep::Remind => "remind",
        }
    }

    async fn run(&self, engine: &ApprovalEngine) -> MdmResult<usize> {
        let now = Utc::now().naive_utc();
        match self {
            Sweep::Expire => engine.expire_sweep(now).await,
            Sweep::Remind => engine.remind_sweep(now).await,
        }
    }
}

fn spawn_loop(
    engine: Arc<ApprovalEngine>,
    sweep: Sweep,
    every_secs: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let every = Duration::from_secs(every_secs.max(1));
        tracing::info!(sweep = sweep.name(), interval_secs = every.as_secs(), "sweep started");
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match sweep.run(&engine).await {
                        Ok(0) => {}
                        Ok(claimed) => tracing::info!(sweep = sweep.name(), claimed, "sweep claimed rows"),
                        Err(e) => tracing::error!(sweep = sweep.name(), error = %e, "sweep failed"),
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() { break; }
                }
            }
        }
        tracing::info!(sweep = sweep.name(), "sweep stopped");
    })
}

/// 启动过期与催办两个后台扫描，`shutdown` 置为 true 时退出
/// Start the expire and remind sweeps; both stop once `shutdown` turns true
pub fn spawn_sweeps(
    engine: Arc<ApprovalEngine>,
    settings: &ApprovalSettings,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    vec![
        spawn_loop(engine.clone(), Sweep::Expire, settings.expire_sweep_secs, shutdown.clone()),
        spawn_loop(engine, Sweep::Remind, settings.remind_sweep_secs, shutdown),
    ]
}

/// 各执行一次，返回 (过期数, 催办数) / run each sweep once, returns (expired, reminded)
pub async fn run_once(engine: &ApprovalEngine) -> MdmResult<(usize, usize)> {
    let expired = Sweep::Expire.run(engine).await?;
    let reminded = Sweep::Remind.run(engine).await?;
    Ok((expired, reminded))
}
