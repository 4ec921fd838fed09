use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::{tempdir, TempDir};
use upvc_lib::*;

const NBR_LEN: usize = 4;
const NB_DPUS_PER_RANK: usize = 2;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn packed(seq: &[u8]) -> Vec<u8> {
    let mut out = vec![0_u8; NBR_LEN];
    string_to_bit2(&mut out, seq);
    out
}

fn devices(dir: &TempDir, nb_dpus_per_run: usize, max_results: usize, debug_dpu: Option<usize>) -> Devices<FunctionalSimulator> {
    let binary = dir.path().join("upvc_dpu");
    fs::write(&binary, b"dpu image").unwrap();
    let mut config = RunConfig::new(nb_dpus_per_run, TargetType::Simulator, &binary);
    config.log_path = dir.path().join("upvc_log.txt");
    config.result_dir = dir.path().join("res");
    config.stats = true;
    config.debug_dpu = debug_dpu;
    let profile = SimulatorProfile {
        nb_dpus_per_rank: NB_DPUS_PER_RANK,
        layout: MramLayout::new(2, max_results, 4096).unwrap(),
    };
    let simulator = FunctionalSimulator::new(profile, Arc::new(NeighbourMatcher { max_score: 0 }));
    Devices::alloc(simulator, &config).unwrap()
}

/// One image per unit: `nb_copies` copies of the same neighbour, tagged with the unit id.
fn images(nb_dpus: usize, dpu_offset: usize, nb_copies: u32) -> Vec<IndexImage> {
    (0..nb_dpus)
        .map(|dpu| {
            let mut image = IndexImage::new(NBR_LEN, 0);
            for copy in 0..nb_copies {
                let coord = DpuResultCoord {
                    seed_nr: (dpu_offset + dpu) as u32,
                    seq_nr: 100 + copy,
                };
                image.push(coord, &packed(b"ACGTTGCAACGTTGCA")).unwrap();
            }
            image
        })
        .collect()
}

/// Two reads per unit per pass, every one pointing at the unit's neighbours.
fn fill_passes(nb_passes: u32, nb_dpus: usize, nb_nbr: u32) -> impl FnMut(u32, &mut Dispatch) -> Result<bool> {
    move |pass, dispatch| {
        if pass == nb_passes {
            return Ok(false);
        }
        for dpu in 0..nb_dpus {
            for k in 0..2 {
                let seed = IndexSeed {
                    num_dpu: dpu,
                    offset: 0,
                    nb_nbr,
                };
                let num = pass * 100 + dpu as u32 * 10 + k;
                add_seed_to_dpu_requests(dispatch, num, &seed, &packed(b"ACGTTGCAACGTTGCA"))?;
            }
        }
        Ok(true)
    }
}

fn read_listing(dir: &Path, name: &str) -> Vec<String> {
    fs::read_to_string(dir.join("res").join(name))
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_rounds_over_all_ranks() {
    init_logs();
    let dir = tempdir().unwrap();
    let devices = devices(&dir, 4, 64, None);
    let times = TimesCtx::new();

    for (round_nr, dpu_offset) in [(0_u32, 0_usize), (1, 4)] {
        let round = Round {
            round: round_nr,
            dpu_offset,
            size_neighbour_in_bytes: NBR_LEN,
        };
        let mut collected = Vec::new();
        let nb_passes = run_round(
            &devices,
            &round,
            &images(4, dpu_offset, 2),
            &times,
            fill_passes(2, 4, 2),
            |results| {
                collected.push(results);
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(nb_passes, 2);
        assert_eq!(collected.len(), 4);

        for rank in collected.iter() {
            assert_eq!(rank.pass.round, round_nr);
            assert_eq!(rank.units.len(), NB_DPUS_PER_RANK);
            for (member, unit) in rank.units.iter().enumerate() {
                assert_eq!(unit.dpu, dpu_offset + rank.rank_id * NB_DPUS_PER_RANK + member);
                let mut nums: Vec<u32> = unit.results.iter().map(|r| r.num).collect();
                nums.sort();
                nums.dedup();
                let local = (unit.dpu - dpu_offset) as u32;
                let base = rank.pass.pass * 100 + local * 10;
                assert_eq!(nums, vec![base, base + 1]);
                assert!(unit.results.iter().all(|r| r.score == 0 && r.coord.seed_nr == unit.dpu as u32));
                let stats = unit.stats.unwrap();
                assert_eq!(stats.nb_reqs, 2);
                assert_eq!(stats.nb_results, 4);
            }
        }
        let mut seen: Vec<(u32, usize)> = collected.iter().map(|r| (r.pass.pass, r.rank_id)).collect();
        seen.sort();
        assert_eq!(seen, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    let listing = read_listing(dir.path(), "result_round_1_pass_1_rank_1_offset_4_dpu_7.txt");
    assert_eq!(listing.len(), 4);
    assert!(listing[0].starts_with("0 - 13"));
    assert!(listing.iter().all(|line| line.ends_with(" 0 7 100") || line.ends_with(" 0 7 101")));

    let total = times.total().unwrap();
    assert!(total.map_read >= total.compute);
    drop(devices);
    let log = fs::read_to_string(dir.path().join("upvc_log.txt")).unwrap();
    assert_eq!(log.matches("rank 1 offset 4\n").count(), 2);
    assert!(log.contains("LOG DPU=5 REQ=2\n"));
    assert!(log.contains("LOG DPU=0 RESULTS=4\n"));
}

#[test]
fn test_debug_unit_runs_alone() {
    init_logs();
    let dir = tempdir().unwrap();
    let devices = devices(&dir, 4, 64, Some(3));
    let round = Round {
        round: 0,
        dpu_offset: 0,
        size_neighbour_in_bytes: NBR_LEN,
    };
    let mut collected = Vec::new();
    let nb_passes = run_round(
        &devices,
        &round,
        &images(4, 0, 1),
        &TimesCtx::new(),
        fill_passes(3, 4, 1),
        |results| {
            collected.push(results);
            Ok(())
        },
    )
    .unwrap();
    assert_eq!(nb_passes, 3);
    assert_eq!(collected.len(), 3);
    for rank in collected.iter() {
        assert_eq!(rank.rank_id, 1);
        assert!(rank.units[0].results.is_empty());
        assert_eq!(rank.units[1].dpu, 3);
        assert_eq!(rank.units[1].results.len(), 2);
    }
    assert!(!dir.path().join("res/result_round_0_pass_0_rank_0_offset_0_dpu_0.txt").exists());
}

#[test]
fn test_result_overflow_aborts_round() {
    init_logs();
    let dir = tempdir().unwrap();
    // two reads of four matches each overflow the six usable slots
    let devices = devices(&dir, 4, 8, None);
    let round = Round {
        round: 0,
        dpu_offset: 0,
        size_neighbour_in_bytes: NBR_LEN,
    };
    let mut consumed = 0;
    let res = run_round(
        &devices,
        &round,
        &images(4, 0, 4),
        &TimesCtx::new(),
        fill_passes(1, 4, 4),
        |_| {
            consumed += 1;
            Ok(())
        },
    );
    assert!(matches!(res, Err(UpvcError::DpuFault { .. })));
    assert_eq!(consumed, 0);
}

#[test]
fn test_consumer_error_stops_round() {
    init_logs();
    let dir = tempdir().unwrap();
    let devices = devices(&dir, 4, 64, None);
    let round = Round {
        round: 0,
        dpu_offset: 0,
        size_neighbour_in_bytes: NBR_LEN,
    };
    let res = run_round(
        &devices,
        &round,
        &images(4, 0, 1),
        &TimesCtx::new(),
        fill_passes(5, 4, 1),
        |_| Err(UpvcError::Config("variant calling refused the batch".to_string())),
    );
    assert!(matches!(res, Err(UpvcError::Config(_))));
}

#[test]
fn test_allocation_rejects_partial_rank() {
    let dir = tempdir().unwrap();
    let binary = dir.path().join("upvc_dpu");
    fs::write(&binary, b"dpu image").unwrap();
    let mut config = RunConfig::new(13, TargetType::Simulator, &binary);
    config.log_path = dir.path().join("upvc_log.txt");
    let simulator = FunctionalSimulator::new(SimulatorProfile::default(), Arc::new(NeighbourMatcher { max_score: 0 }));
    assert!(matches!(Devices::alloc(simulator, &config), Err(UpvcError::Config(_))));
    assert!(!config.log_path.exists());
}
