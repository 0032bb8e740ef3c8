use dia_cli::input::Input;
use dia_cli::runner::Runner;
use dia_core::features::{FEATURE_COUNT, FEATURE_NAMES};
use dia_core::library::LibraryPrecursor;
use dia_core::spectrum::Ms2Scan;
use std::path::{Path, PathBuf};

const PRECURSORS: usize = 8;

fn fragment_mz(i: usize, f: usize) -> f32 {
    300.0 + i as f32 * 50.0 + f as f32 * 7.0
}

fn library_rt(i: usize) -> f32 {
    2.0 + i as f32
}

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("dia-cli-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_inputs(dir: &Path) -> (PathBuf, PathBuf) {
    let scans = (0..=120)
        .map(|s| {
            let t = s as f32 * 0.1;
            let mut mz = Vec::new();
            let mut intensity = Vec::new();
            for i in 0..PRECURSORS {
                let h = 1000.0 * (-(t - library_rt(i)).powi(2) / (2.0 * 0.02)).exp();
                for f in 0..3 {
                    mz.push(fragment_mz(i, f));
                    intensity.push((3 - f) as f32 * h + 1.0);
                }
            }
            Ms2Scan::new(s as u32, t, 500.0, 25.0, mz, intensity)
        })
        .collect::<Vec<_>>();

    let library = (0..PRECURSORS)
        .map(|i| LibraryPrecursor {
            sequence: format!("PEPTIDE{}R", i),
            precursor_mz: 500.0,
            charge: 2,
            rt: Some(library_rt(i)),
            fragment_mz: (0..3).map(|f| fragment_mz(i, f)).collect(),
            fragment_intensity: vec![3.0, 2.0, 1.0],
            ..Default::default()
        })
        .collect::<Vec<_>>();

    let scans_path = dir.join("scans.json");
    let library_path = dir.join("library.json");
    std::fs::write(&scans_path, serde_json::to_vec(&scans).unwrap()).unwrap();
    std::fs::write(&library_path, serde_json::to_vec(&library).unwrap()).unwrap();
    (scans_path, library_path)
}

#[test]
fn run_writes_outputs() -> anyhow::Result<()> {
    let dir = scratch("run");
    let (scans, library) = write_inputs(&dir);
    let output_directory = dir.join("out");

    let parameters = serde_json::json!({
        "scans": scans.display().to_string(),
        "library": library.display().to_string(),
        "output_directory": output_directory.display().to_string(),
        "calibration": { "enabled": false },
        "query": { "rt_tolerance_minutes": 1.0 },
        "max_threads": 2,
    });
    let parameters_path = dir.join("parameters.json");
    std::fs::write(&parameters_path, serde_json::to_vec(&parameters)?)?;

    let input = Input::load(parameters_path.display().to_string())?;
    let search = input.build()?;
    assert!(search.calibration.is_none());
    assert_eq!(search.query.max_threads, 2);

    let search = Runner::new(search).run()?;
    // without decoys only the result table and the run parameters are written
    assert_eq!(search.output_paths.len(), 2);

    let table = std::fs::read_to_string(output_directory.join("results.dia.tsv"))?;
    let mut lines = table.lines();
    let header = lines.next().unwrap();
    assert!(header.starts_with("sequence\tcharge\tprecursor_mz\tlabel"));
    assert!(header.ends_with(FEATURE_NAMES[FEATURE_COUNT - 1]));
    let rows = lines.collect::<Vec<_>>();
    assert_eq!(rows.len(), PRECURSORS);
    for row in rows {
        assert_eq!(
            row.split('\t').count(),
            header.split('\t').count(),
            "ragged row: {}",
            row
        );
    }

    let written: serde_json::Value =
        serde_json::from_slice(&std::fs::read(output_directory.join("results.json"))?)?;
    assert_eq!(written["scans"], scans.display().to_string());
    assert!(written["calibration"].is_null());

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn missing_library_is_rejected() -> anyhow::Result<()> {
    let dir = scratch("missing");
    let parameters_path = dir.join("parameters.json");
    std::fs::write(&parameters_path, br#"{ "scans": "scans.json" }"#)?;

    let input = Input::load(parameters_path.display().to_string())?;
    assert!(input.build().is_err());

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}
