use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::devices::Devices;
use crate::layout::{CLOCK_PER_SEC, DPU_RESULT_SIZE};
use crate::platform::Platform;
use crate::rank_pipeline::PassId;
use crate::records::{compute_checksum, DpuResultOut};
use crate::run_config::{ChecksumPolicy, RunConfig};
use crate::stats::{TaskletStats, TASKLET_STATS_SIZE};
use crate::upvc_err::{Result, UpvcError};

/// Valid output of one unit for one pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitResults {
    pub dpu: usize,
    pub results: Vec<DpuResultOut>,
    pub compute_time: u64,
    pub stats: Option<TaskletStats>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankResults {
    pub pass: PassId,
    pub rank_id: usize,
    pub units: Vec<UnitResults>,
}

impl RankResults {
    pub fn nb_results(&self) -> usize {
        self.units.iter().map(|unit| unit.results.len()).sum()
    }
}

/// Reads back, verifies, lists and logs what a rank produced.
#[derive(Clone, Debug)]
pub struct ResultCollector {
    result_dir: PathBuf,
    checksum_policy: ChecksumPolicy,
    stats: bool,
}

/// Records before the end marker, or `None` if the buffer has no marker.
pub fn valid_prefix(buffer: &[u8]) -> Option<usize> {
    buffer
        .chunks_exact(DPU_RESULT_SIZE)
        .position(|record| DpuResultOut::from_bytes(record).is_end_marker())
}

pub fn listing_name(pass: &PassId, rank_id: usize, dpu: usize) -> String {
    format!(
        "result_round_{}_pass_{}_rank_{}_offset_{}_dpu_{}.txt",
        pass.round, pass.pass, rank_id, pass.dpu_offset, dpu
    )
}

fn write_listing(path: &Path, results: &[DpuResultOut]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for (idx, res) in results.iter().enumerate() {
        writeln!(
            out,
            "{} - {} {} {} {}",
            idx, res.num, res.score, res.coord.seed_nr, res.coord.seq_nr
        )?;
    }
    out.flush()?;
    Ok(())
}

fn read_u64(data: &[u8]) -> u64 {
    let mut word = [0_u8; 8];
    word.copy_from_slice(&data[..8]);
    u64::from_le_bytes(word)
}

impl ResultCollector {
    pub fn new(config: &RunConfig) -> ResultCollector {
        ResultCollector {
            result_dir: config.result_dir.clone(),
            checksum_policy: config.checksum_policy,
            stats: config.stats,
        }
    }
    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }

    fn verify(&self, dpu: usize, published: u64, valid: &[u8]) -> Result<()> {
        let computed = compute_checksum(valid);
        if computed == published {
            return Ok(());
        }
        match self.checksum_policy {
            ChecksumPolicy::Fatal => Err(UpvcError::Checksum {
                dpu,
                expected: published,
                computed,
            }),
            ChecksumPolicy::LogOnly => {
                warn!(
                    "checksum mismatch on DPU {}: published {:#018x}, computed {:#018x}",
                    dpu, published, computed
                );
                Ok(())
            }
        }
    }

    /// Gathers the results of every unit of the rank, checks each buffer
    /// against its published checksum, writes one listing per unit and logs
    /// compute times (and tasklet counters when enabled).
    pub fn collect<P: Platform>(&self, devices: &Devices<P>, pass: PassId, rank_id: usize) -> Result<RankResults> {
        let symbols = devices.symbols();
        let buffers = devices.gather(rank_id, symbols.results)?;
        let checksums = devices.gather(rank_id, symbols.checksum)?;
        fs::create_dir_all(&self.result_dir)?;

        let mut units = Vec::with_capacity(buffers.len());
        for (member, (buffer, checksum)) in buffers.iter().zip(checksums.iter()).enumerate() {
            let dpu = devices.dpu_id(rank_id, pass.dpu_offset, member);
            let nb_results = valid_prefix(buffer)
                .ok_or_else(|| UpvcError::Transport(format!("no end of results marker from DPU {}", dpu)))?;
            let valid = &buffer[..nb_results * DPU_RESULT_SIZE];
            self.verify(dpu, read_u64(checksum), valid)?;

            let results: Vec<DpuResultOut> = valid.chunks_exact(DPU_RESULT_SIZE).map(DpuResultOut::from_bytes).collect();
            write_listing(&self.result_dir.join(listing_name(&pass, rank_id, dpu)), &results)?;
            units.push(UnitResults {
                dpu,
                results,
                compute_time: 0,
                stats: None,
            });
        }

        let compute_times = devices.gather(rank_id, symbols.compute_time)?;
        for (unit, time) in units.iter_mut().zip(compute_times.iter()) {
            unit.compute_time = read_u64(time);
        }
        if self.stats {
            let tasklet_stats = devices.gather(rank_id, symbols.tasklet_stats)?;
            for (unit, raw) in units.iter_mut().zip(tasklet_stats.iter()) {
                unit.stats = Some(raw.chunks_exact(TASKLET_STATS_SIZE).map(TaskletStats::from_bytes).sum());
            }
        }
        self.log(devices, pass, rank_id, &units)?;

        let collected = RankResults { pass, rank_id, units };
        debug!(
            "rank {} pass {}: {} results collected",
            rank_id,
            pass.pass,
            collected.nb_results()
        );
        Ok(collected)
    }

    fn log<P: Platform>(&self, devices: &Devices<P>, pass: PassId, rank_id: usize, units: &[UnitResults]) -> Result<()> {
        let mut log = devices.log_file()?;
        writeln!(log, "rank {} offset {}", rank_id, pass.dpu_offset)?;
        for unit in units {
            let dpu = unit.dpu;
            writeln!(
                log,
                "LOG DPU={} TIME={} SEC={:.3}",
                dpu,
                unit.compute_time,
                unit.compute_time as f64 / CLOCK_PER_SEC
            )?;
            if let Some(stats) = unit.stats {
                writeln!(log, "LOG DPU={} REQ={}", dpu, stats.nb_reqs)?;
                writeln!(log, "LOG DPU={} NODP={}", dpu, stats.nb_nodp_calls)?;
                writeln!(log, "LOG DPU={} ODPD={}", dpu, stats.nb_odpd_calls)?;
                writeln!(log, "LOG DPU={} NODP_TIME={}", dpu, stats.nodp_time)?;
                writeln!(log, "LOG DPU={} ODPD_TIME={}", dpu, stats.odpd_time)?;
                writeln!(log, "LOG DPU={} RESULTS={}", dpu, stats.nb_results)?;
                writeln!(log, "LOG DPU={} DATA_IN={}", dpu, stats.mram_data_load)?;
                writeln!(log, "LOG DPU={} RESULT_OUT={}", dpu, stats.mram_result_store)?;
                writeln!(log, "LOG DPU={} LOAD={}", dpu, stats.mram_load)?;
                writeln!(log, "LOG DPU={} STORE={}", dpu, stats.mram_store)?;
            }
        }
        log.flush()?;
        Ok(())
    }
}
