mod common;

use camino::Utf8Path;
use hifitime::Duration;
use nalgebra::Vector3;

use corefit::batch::{resolve_convert_targets, run_convert, ConvertOutcome, ConvertSummary};
use corefit::config::{Config, FitOverrides};
use corefit::constants::{DayKey, Probe};
use corefit::dataset::csv_export::{convert_day, CSV_COLUMNS};
use corefit::dataset::parquet_io::write_day;
use corefit::dataset::{csv_path, table_path, DailyDataset};
use corefit::fitting::{vth_to_kelvin, CoreFit, FitStatus};
use corefit::records::MagCadence;
use corefit::time::day_start;

/// One clean row and one field-too-variable row with withheld quantities.
fn sample_rows() -> Vec<CoreFit> {
    let day = day_start(1976, 92).unwrap();
    vec![
        CoreFit {
            epoch: day + Duration::from_seconds(3600.0),
            status: FitStatus::Converged,
            ion_instrument: 1,
            b_cadence: MagCadence::FourHertz,
            b: Vector3::new(3.25, -2.5, 6.125),
            sigma_b: 0.75,
            n_p: 8.53125,
            v_p: Vector3::new(-380.123456, 22.5, -4.25),
            vth_par: 42.5,
            vth_perp: 31.25,
            t_par: vth_to_kelvin(42.5),
            t_perp: vth_to_kelvin(31.25),
            r_sun: 0.4173,
            clat: -3.1,
            clong: 152.3,
        },
        CoreFit {
            epoch: day + Duration::from_seconds(7200.0),
            status: FitStatus::UnstableField,
            ion_instrument: 2,
            b_cadence: MagCadence::SixSecond,
            b: Vector3::new(1.0, 1.0, 14.0),
            sigma_b: 8.25,
            n_p: f64::NAN,
            v_p: Vector3::new(-420.0, -10.0, 8.0),
            vth_par: f64::NAN,
            vth_perp: f64::NAN,
            t_par: f64::NAN,
            t_perp: f64::NAN,
            r_sun: 0.4169,
            clat: -3.2,
            clong: 152.8,
        },
    ]
}

fn write_sample_table(output_root: &Utf8Path, key: DayKey) -> camino::Utf8PathBuf {
    let dataset = DailyDataset::from_rows(key, sample_rows());
    write_day(&dataset, output_root).unwrap()
}

#[test]
fn test_convert_day_published_layout() {
    let root = common::scratch_dir("convert-layout");
    let key = DayKey::new(Probe::Helios1, 1976, 92);
    let table = write_sample_table(&root, key);
    let csv = csv_path(&root, &key);

    assert_eq!(convert_day(&table, &csv).unwrap(), 2);
    assert!(csv.is_file());

    let mut reader = csv::Reader::from_path(&csv).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(headers.len(), CSV_COLUMNS.len());
    for (got, expected) in headers.iter().zip(CSV_COLUMNS) {
        assert_eq!(got, expected);
    }

    let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 2);

    // Clean row: everything published.
    assert_eq!(&records[0][0], "1976-04-01T01:00:00");
    assert_eq!(&records[0][1], "1"); // B instrument
    assert_eq!(&records[0][2], "3.25"); // Bx
    assert_eq!(&records[0][6], "1"); // Ion instrument
    assert_eq!(&records[0][7], "1"); // Status
    assert_ne!(&records[0][8], "NaN"); // Tp_par present
    assert_eq!(&records[0][14], "-380.123"); // vp_x, 6 significant figures
    assert_eq!(&records[0][17], "42.5"); // vth_p_par

    // Field-too-variable row: status publishes as 1, plasma quantities NaN.
    assert_eq!(&records[1][0], "1976-04-01T02:00:00");
    assert_eq!(&records[1][1], "2");
    assert_eq!(&records[1][6], "2");
    assert_eq!(&records[1][7], "1");
    assert_eq!(&records[1][8], "NaN"); // Tp_par
    assert_eq!(&records[1][13], "NaN"); // n_p
    assert_eq!(&records[1][14], "-420"); // velocity still published
    assert_eq!(&records[1][18], "NaN"); // vth_p_perp

    // Converting again overwrites in place.
    assert_eq!(convert_day(&table, &csv).unwrap(), 2);
}

#[test]
fn test_run_convert_outcomes() {
    let root = common::scratch_dir("convert-outcomes");
    let key = DayKey::new(Probe::Helios2, 1976, 92);
    write_sample_table(&root, key);

    assert_eq!(resolve_convert_targets(&root, None, None, None), vec![key]);
    assert_eq!(
        resolve_convert_targets(&root, Some(Probe::Helios1), None, None),
        vec![]
    );

    let config = Config {
        data_dir: root.join("unused"),
        output_dir: root.clone(),
        fit: FitOverrides::default(),
    };
    let missing = DayKey::new(Probe::Helios2, 1976, 93);
    let results = run_convert(&config, &[key, missing]);

    assert!(matches!(
        results[&key],
        ConvertOutcome::Converted { rows: 2 }
    ));
    assert!(matches!(results[&missing], ConvertOutcome::MissingTable));
    assert!(csv_path(&root, &key).is_file());
    assert!(!csv_path(&root, &missing).exists());

    let summary = ConvertSummary::from_results(&results);
    assert_eq!(summary.days, 2);
    assert_eq!(summary.converted, 1);
    assert_eq!(summary.missing, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.rows, 2);
    assert!(!summary.has_failures());
}

#[test]
fn test_csv_lives_beside_the_table() {
    let root = common::scratch_dir("convert-paths");
    let key = DayKey::new(Probe::Helios1, 1975, 300);
    let table = table_path(&root, &key);
    let csv = csv_path(&root, &key);

    assert!(table
        .as_str()
        .ends_with("helios1/fits/1975/h1_1975_300_corefit.parquet"));
    assert!(csv
        .as_str()
        .ends_with("helios1/fits/1975/csv/h1_1975_300_corefit.csv"));
}

#[test]
fn test_failed_write_leaves_no_tmp_behind() {
    let root = common::scratch_dir("convert-failed-write");
    let key = DayKey::new(Probe::Helios1, 1976, 92);
    let dataset = DailyDataset::from_rows(key, sample_rows());

    // Occupy the table path with a directory so the rename into place fails.
    let table = table_path(&root, &key);
    std::fs::create_dir_all(&table).unwrap();

    assert!(write_day(&dataset, &root).is_err());
    let tmp = camino::Utf8PathBuf::from(format!("{table}.tmp"));
    assert!(!tmp.exists());
}
