use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};

use log::{debug, error, info};

use crate::dispatch::Dispatch;
use crate::layout::{
    MramInfo, MramSymbol, DPU_COMPUTE_TIME_VAR, DPU_MRAM_HEAP_POINTER_NAME, DPU_RESULTS_CHECKSUM_VAR, DPU_RESULT_VAR,
    DPU_TASKLET_STATS_VAR, REQUEST_INFO_SIZE,
};
use crate::mram_image::IndexImage;
use crate::platform::{GatherMatrix, Platform, RunStatus, ScatterMatrix};
use crate::records::RequestInfo;
use crate::run_config::RunConfig;
use crate::stats::TASKLET_STATS_SIZE;
use crate::upvc_err::{Result, UpvcError};

/// MRAM regions the host talks to, identical on every unit of the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceSymbols {
    pub heap: MramSymbol,
    pub results: MramSymbol,
    pub checksum: MramSymbol,
    pub compute_time: MramSymbol,
    pub tasklet_stats: MramSymbol,
}

impl DeviceSymbols {
    fn resolve<P: Platform>(platform: &P, rank: usize, member: usize) -> Result<DeviceSymbols> {
        Ok(DeviceSymbols {
            heap: platform.mram_symbol(rank, member, DPU_MRAM_HEAP_POINTER_NAME)?,
            results: platform.mram_symbol(rank, member, DPU_RESULT_VAR)?,
            checksum: platform.mram_symbol(rank, member, DPU_RESULTS_CHECKSUM_VAR)?,
            compute_time: platform.mram_symbol(rank, member, DPU_COMPUTE_TIME_VAR)?,
            tasklet_stats: platform.mram_symbol(rank, member, DPU_TASKLET_STATS_VAR)?,
        })
    }
    pub fn nb_tasklets(&self) -> usize {
        self.tasklet_stats.size / TASKLET_STATS_SIZE
    }
}

/// Every rank of a run, the program loaded on them and the run log.
///
/// Unit `member` of rank `rank_id` is run-local unit
/// `rank_id * nb_dpus_per_rank + member`; adding the pass `dpu_offset` gives
/// its identity in the global index.
pub struct Devices<P: Platform> {
    platform: P,
    config: RunConfig,
    nb_dpus_per_rank: usize,
    ranks: Vec<usize>,
    symbols: DeviceSymbols,
    mram_info: RwLock<Vec<MramInfo>>,
    log_file: Mutex<BufWriter<File>>,
}

impl<P: Platform> Devices<P> {
    /// Allocates `config.nb_dpus_per_run` units and loads the program on them.
    ///
    /// Symbols are resolved once on the first unit; every unit of the run is
    /// required to share that layout, which is checked against the last unit.
    pub fn alloc(platform: P, config: &RunConfig) -> Result<Devices<P>> {
        config.validate()?;
        if platform.target() != config.target {
            return Err(UpvcError::Config(format!(
                "run configured for {:?} but the platform drives {:?}",
                config.target,
                platform.target()
            )));
        }
        let nb_dpus_per_rank = platform.nb_dpus_per_rank();
        if nb_dpus_per_rank == 0 || config.nb_dpus_per_run % nb_dpus_per_rank != 0 {
            return Err(UpvcError::Config(format!(
                "number of DPUs per run ({}) must be a multiple of the number of DPUs per rank ({})",
                config.nb_dpus_per_run, nb_dpus_per_rank
            )));
        }
        fs::metadata(&config.dpu_binary).map_err(|e| {
            UpvcError::Config(format!("cannot read DPU program {}: {}", config.dpu_binary.display(), e))
        })?;
        let log_file = BufWriter::new(File::create(&config.log_path)?);

        let nb_ranks = config.nb_dpus_per_run / nb_dpus_per_rank;
        let mut ranks = Vec::with_capacity(nb_ranks);
        for _ in 0..nb_ranks {
            let rank = platform.alloc_rank()?;
            platform.load_program(rank, &config.dpu_binary)?;
            ranks.push(rank);
        }
        let symbols = DeviceSymbols::resolve(&platform, ranks[0], 0)?;
        if DeviceSymbols::resolve(&platform, ranks[nb_ranks - 1], nb_dpus_per_rank - 1)? != symbols {
            return Err(UpvcError::Config("DPUs of the run do not share one MRAM layout".to_string()));
        }
        info!(
            "allocated {} ranks of {} DPUs, {} tasklets each",
            nb_ranks,
            nb_dpus_per_rank,
            symbols.nb_tasklets()
        );
        debug!("MRAM symbols: {:?}", symbols);

        Ok(Devices {
            platform,
            config: config.clone(),
            nb_dpus_per_rank,
            ranks,
            symbols,
            mram_info: RwLock::new(vec![MramInfo::default(); config.nb_dpus_per_run]),
            log_file: Mutex::new(log_file),
        })
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }
    pub fn config(&self) -> &RunConfig {
        &self.config
    }
    pub fn symbols(&self) -> &DeviceSymbols {
        &self.symbols
    }
    pub fn nb_ranks(&self) -> usize {
        self.ranks.len()
    }
    pub fn nb_dpus_per_rank(&self) -> usize {
        self.nb_dpus_per_rank
    }
    pub fn nb_dpus(&self) -> usize {
        self.ranks.len() * self.nb_dpus_per_rank
    }
    pub fn dpu_id(&self, rank_id: usize, dpu_offset: usize, member: usize) -> usize {
        dpu_offset + rank_id * self.nb_dpus_per_rank + member
    }
    /// Whether the rank takes part in the pass: always, unless a debug unit
    /// is set and lives on another rank.
    pub fn rank_runs(&self, rank_id: usize, dpu_offset: usize) -> bool {
        match self.config.debug_dpu {
            None => true,
            Some(debug_dpu) => {
                debug_dpu / self.nb_dpus_per_rank == rank_id + dpu_offset / self.nb_dpus_per_rank
            }
        }
    }
    pub fn mram_info(&self, local_dpu: usize) -> Result<MramInfo> {
        self.mram_info
            .read()?
            .get(local_dpu)
            .copied()
            .ok_or_else(|| UpvcError::Config(format!("no DPU {} in the run", local_dpu)))
    }
    pub fn log_file(&self) -> Result<MutexGuard<'_, BufWriter<File>>> {
        Ok(self.log_file.lock()?)
    }
    fn rank(&self, rank_id: usize) -> Result<usize> {
        self.ranks
            .get(rank_id)
            .copied()
            .ok_or_else(|| UpvcError::Config(format!("no rank {} in the run", rank_id)))
    }

    /// Loads the reference index of every unit of the rank, one image per member.
    pub fn load_index(&self, rank_id: usize, dpu_offset: usize, images: &[IndexImage]) -> Result<()> {
        let rank = self.rank(rank_id)?;
        if images.len() != self.nb_dpus_per_rank {
            return Err(UpvcError::Config(format!(
                "{} index images for a rank of {} DPUs",
                images.len(),
                self.nb_dpus_per_rank
            )));
        }
        let areas: Vec<Vec<u8>> = images.iter().map(|image| image.to_bytes()).collect();
        let mut matrix = ScatterMatrix::new();
        for (member, area) in areas.iter().enumerate() {
            // the request header must still fit behind the index
            if area.len() + REQUEST_INFO_SIZE > self.symbols.heap.size {
                return Err(UpvcError::InputCapacity {
                    dpu: self.dpu_id(rank_id, dpu_offset, member),
                    needed: area.len() + REQUEST_INFO_SIZE,
                    available: self.symbols.heap.size,
                });
            }
            matrix.add(member, area, self.symbols.heap.addr)?;
        }
        self.platform.copy_to_dpus(rank, &matrix)?;

        let mut mram_info = self.mram_info.write()?;
        for (member, image) in images.iter().enumerate() {
            mram_info[rank_id * self.nb_dpus_per_rank + member] = image.info();
        }
        Ok(())
    }

    /// Writes the request header and read records of every unit of the rank.
    ///
    /// In debug mode only the debug unit gets its reads; the other units see
    /// an empty pass.
    pub fn write_dispatch(&self, rank_id: usize, dpu_offset: usize, dispatch: &Dispatch) -> Result<()> {
        let rank = self.rank(rank_id)?;
        let mut headers = Vec::with_capacity(self.nb_dpus_per_rank);
        let mut placements = Vec::with_capacity(self.nb_dpus_per_rank);
        for member in 0..self.nb_dpus_per_rank {
            let local_dpu = rank_id * self.nb_dpus_per_rank + member;
            let this_dpu = self.dpu_id(rank_id, dpu_offset, member);
            let info = self.mram_info(local_dpu)?;
            let request = dispatch
                .request(local_dpu)
                .ok_or_else(|| UpvcError::Config(format!("dispatch has no entry for DPU {}", this_dpu)))?;
            let selected = self.config.debug_dpu.map_or(true, |debug_dpu| debug_dpu == this_dpu);
            let nb_reads = if selected { request.nb_reads() } else { 0 };

            if nb_reads > 0 {
                if dispatch.request_size() != info.request_size() {
                    return Err(UpvcError::Config(format!(
                        "reads of {} bytes sent to DPU {} whose index expects {} bytes",
                        dispatch.request_size(),
                        this_dpu,
                        info.request_size()
                    )));
                }
                let needed = info.request_offset() + request.reads().len();
                if needed > self.symbols.heap.size {
                    return Err(UpvcError::InputCapacity {
                        dpu: this_dpu,
                        needed,
                        available: self.symbols.heap.size,
                    });
                }
            }
            headers.push(RequestInfo::new(nb_reads).to_bytes());
            placements.push((info, nb_reads > 0));
        }

        let mut matrix_header = ScatterMatrix::new();
        let mut matrix_reads = ScatterMatrix::new();
        for (member, (header, (info, has_reads))) in headers.iter().zip(placements.iter()).enumerate() {
            let local_dpu = rank_id * self.nb_dpus_per_rank + member;
            matrix_header.add(member, header, self.symbols.heap.addr + info.request_info_offset())?;
            if *has_reads {
                if let Some(request) = dispatch.request(local_dpu) {
                    matrix_reads.add(member, request.reads(), self.symbols.heap.addr + info.request_offset())?;
                }
            }
        }
        self.platform.copy_to_dpus(rank, &matrix_header)?;
        if !matrix_reads.is_empty() {
            self.platform.copy_to_dpus(rank, &matrix_reads)?;
        }
        Ok(())
    }

    pub fn boot(&self, rank_id: usize) -> Result<()> {
        self.platform.boot(self.rank(rank_id)?)
    }

    /// Checks the rank once; `true` when every unit is idle.
    pub fn poll(&self, rank_id: usize, dpu_offset: usize) -> Result<bool> {
        let statuses = self.platform.status(self.rank(rank_id)?)?;
        let mut all_idle = true;
        for (member, status) in statuses.into_iter().enumerate() {
            match status {
                RunStatus::Idle => {}
                RunStatus::Running => all_idle = false,
                RunStatus::Fault => {
                    let dpu = self.dpu_id(rank_id, dpu_offset, member);
                    error!("DPU {} reported an error - aborting", dpu);
                    return Err(UpvcError::DpuFault { dpu });
                }
                RunStatus::Unknown(status) => {
                    let dpu = self.dpu_id(rank_id, dpu_offset, member);
                    error!("could not get DPU {} status {} - aborting", dpu, status);
                    return Err(UpvcError::DpuStatusUnknown { dpu, status });
                }
            }
        }
        Ok(all_idle)
    }

    /// Reads the same region back from every unit of the rank in one transfer.
    pub fn gather(&self, rank_id: usize, symbol: MramSymbol) -> Result<Vec<Vec<u8>>> {
        let rank = self.rank(rank_id)?;
        let mut buffers = vec![vec![0_u8; symbol.size]; self.nb_dpus_per_rank];
        let mut matrix = GatherMatrix::new();
        for (member, buffer) in buffers.iter_mut().enumerate() {
            matrix.add(member, buffer, symbol.addr)?;
        }
        self.platform.copy_from_dpus(rank, &mut matrix)?;
        drop(matrix);
        Ok(buffers)
    }

    /// Dumps the whole MRAM of run-local unit `local_dpu` into `path`.
    pub fn backup_mram(&self, local_dpu: usize, path: &Path) -> Result<()> {
        let rank = self.rank(local_dpu / self.nb_dpus_per_rank)?;
        info!("saving DPU {} MRAM into '{}'", local_dpu, path.display());
        let mut mram = vec![0_u8; self.platform.mram_size()];
        self.platform
            .copy_from_individual(rank, local_dpu % self.nb_dpus_per_rank, 0, &mut mram)?;
        fs::write(path, &mram)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{MramLayout, DPU_RESULT_SIZE};
    use crate::program::NeighbourMatcher;
    use crate::records::DpuResultCoord;
    use crate::run_config::TargetType;
    use crate::simulator::{FunctionalSimulator, SimulatorProfile};
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    fn simulator(nb_dpus_per_rank: usize) -> FunctionalSimulator {
        let profile = SimulatorProfile {
            nb_dpus_per_rank,
            layout: MramLayout::new(2, 16, 512).unwrap(),
        };
        FunctionalSimulator::new(profile, Arc::new(NeighbourMatcher { max_score: 0 }))
    }

    fn config(dir: &TempDir, nb_dpus_per_run: usize) -> RunConfig {
        let binary = dir.path().join("upvc_dpu");
        fs::write(&binary, b"dpu").unwrap();
        let mut config = RunConfig::new(nb_dpus_per_run, TargetType::Simulator, &binary);
        config.log_path = dir.path().join("upvc_log.txt");
        config.result_dir = dir.path().join("res");
        config
    }

    #[test]
    fn test_alloc_rejects_other_target() {
        let dir = tempdir().unwrap();
        let mut config = config(&dir, 2);
        config.target = TargetType::Hardware;
        assert!(matches!(Devices::alloc(simulator(2), &config), Err(UpvcError::Config(_))));
        assert!(!config.log_path.exists());
    }

    #[test]
    fn test_alloc_rejects_partial_rank() {
        let dir = tempdir().unwrap();
        let res = Devices::alloc(simulator(4), &config(&dir, 13));
        assert!(matches!(res, Err(UpvcError::Config(_))));
        assert!(!dir.path().join("upvc_log.txt").exists());
    }

    #[test]
    fn test_alloc_rejects_missing_program() {
        let dir = tempdir().unwrap();
        let mut config = config(&dir, 4);
        config.dpu_binary = dir.path().join("missing");
        assert!(matches!(Devices::alloc(simulator(4), &config), Err(UpvcError::Config(_))));
    }

    #[test]
    fn test_alloc_maps_ranks() {
        let dir = tempdir().unwrap();
        let devices = Devices::alloc(simulator(4), &config(&dir, 8)).unwrap();
        assert_eq!(devices.nb_ranks(), 2);
        assert_eq!(devices.nb_dpus(), 8);
        assert_eq!(devices.platform().nb_ranks().unwrap(), 2);
        assert_eq!(devices.symbols().nb_tasklets(), 2);
        assert_eq!(devices.symbols().results.size, 16 * DPU_RESULT_SIZE);
        assert_eq!(devices.dpu_id(1, 16, 2), 22);
        assert!(dir.path().join("upvc_log.txt").exists());
    }

    #[test]
    fn test_write_dispatch_checks_input_budget() {
        let dir = tempdir().unwrap();
        let devices = Devices::alloc(simulator(2), &config(&dir, 2)).unwrap();
        let images = vec![IndexImage::new(8, 0), IndexImage::new(8, 0)];
        devices.load_index(0, 0, &images).unwrap();

        let mut dispatch = Dispatch::new(2, 8);
        for num in 0..30 {
            dispatch.add(1, 0, 1, num, &[0; 8]).unwrap();
        }
        match devices.write_dispatch(0, 0, &dispatch) {
            Err(UpvcError::InputCapacity { dpu, needed, available }) => {
                assert_eq!(dpu, 1);
                assert_eq!(available, 512);
                assert!(needed > available);
            }
            other => panic!("expected an input capacity error, got {:?}", other.err()),
        }

        let mut small = Dispatch::new(2, 8);
        small.add(1, 0, 1, 0, &[0; 8]).unwrap();
        devices.write_dispatch(0, 0, &small).unwrap();
    }

    #[test]
    fn test_write_dispatch_checks_record_size() {
        let dir = tempdir().unwrap();
        let devices = Devices::alloc(simulator(2), &config(&dir, 2)).unwrap();
        let mut image = IndexImage::new(4, 0);
        image.push(DpuResultCoord::default(), &[0; 4]).unwrap();
        devices.load_index(0, 0, &[image.clone(), image]).unwrap();
        let mut dispatch = Dispatch::new(2, 8);
        dispatch.add(0, 0, 1, 0, &[0; 8]).unwrap();
        assert!(matches!(devices.write_dispatch(0, 0, &dispatch), Err(UpvcError::Config(_))));
    }

    #[test]
    fn test_debug_rank_selection() {
        let dir = tempdir().unwrap();
        let mut config = config(&dir, 8);
        config.debug_dpu = Some(5);
        let devices = Devices::alloc(simulator(4), &config).unwrap();
        assert!(!devices.rank_runs(0, 0));
        assert!(devices.rank_runs(1, 0));
        assert!(!devices.rank_runs(1, 4));
    }

    #[test]
    fn test_backup_mram() {
        let dir = tempdir().unwrap();
        let devices = Devices::alloc(simulator(2), &config(&dir, 2)).unwrap();
        let mut image = IndexImage::new(4, 3);
        image.push(DpuResultCoord { seed_nr: 1, seq_nr: 2 }, &[7; 4]).unwrap();
        devices.load_index(0, 0, &[IndexImage::new(4, 3), image]).unwrap();
        let path = dir.path().join("dpu1.bin");
        devices.backup_mram(1, &path).unwrap();
        let dump = fs::read(&path).unwrap();
        assert_eq!(dump.len(), devices.platform().mram_size());
        assert_eq!(&dump[4..8], &1_u32.to_le_bytes());
        assert_eq!(&dump[16..20], &1_u32.to_le_bytes());
    }

    struct StuckPlatform;

    impl Platform for StuckPlatform {
        fn target(&self) -> TargetType {
            TargetType::Simulator
        }
        fn nb_dpus_per_rank(&self) -> usize {
            2
        }
        fn mram_size(&self) -> usize {
            MramLayout::default().mram_size()
        }
        fn alloc_rank(&self) -> Result<usize> {
            Ok(0)
        }
        fn load_program(&self, _rank: usize, _program: &Path) -> Result<()> {
            Ok(())
        }
        fn mram_symbol(&self, _rank: usize, _member: usize, name: &str) -> Result<MramSymbol> {
            MramLayout::default()
                .symbol(name)
                .ok_or_else(|| UpvcError::Transport(name.to_string()))
        }
        fn copy_to_dpus(&self, _rank: usize, _matrix: &ScatterMatrix<'_>) -> Result<()> {
            Ok(())
        }
        fn copy_from_dpus(&self, _rank: usize, _matrix: &mut GatherMatrix<'_>) -> Result<()> {
            Ok(())
        }
        fn boot(&self, _rank: usize) -> Result<()> {
            Ok(())
        }
        fn status(&self, _rank: usize) -> Result<Vec<RunStatus>> {
            Ok(vec![RunStatus::Running, RunStatus::Unknown(7)])
        }
        fn copy_from_individual(&self, _rank: usize, _member: usize, _addr: usize, _buf: &mut [u8]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_poll_reports_unknown_status() {
        let dir = tempdir().unwrap();
        let devices = Devices::alloc(StuckPlatform, &config(&dir, 2)).unwrap();
        match devices.poll(0, 10) {
            Err(UpvcError::DpuStatusUnknown { dpu, status }) => {
                assert_eq!(dpu, 11);
                assert_eq!(status, 7);
            }
            other => panic!("expected an unknown status, got {:?}", other),
        }
    }
}
