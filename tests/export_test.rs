//! Integration tests for dataset export.

use iv_sweep::data::{
    check_destination, export, export_auto, Dataset, ExportFormat, SharedDataset,
};
use iv_sweep::error::IvError;
use iv_sweep::hardware::capabilities::MeterSettings;
use iv_sweep::hardware::mock::MockBench;
use iv_sweep::sweep::{
    MeasurementSession, NullObserver, SessionOptions, SessionOrder, SessionRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

async fn measured_dataset() -> Dataset {
    let bench = MockBench::new(200.0);
    let dataset = SharedDataset::new();
    let request = SessionRequest::new(
        SessionOrder::measure(0.002, 0.001),
        bench.source.clone(),
        bench.meter.clone(),
    );
    let options = SessionOptions {
        settle: Duration::ZERO,
        reset_hold: Duration::ZERO,
        meter: MeterSettings {
            sampling_interval_s: 0.0001,
            trigger_delay_s: 0.0,
            sample_count: 2,
        },
    };
    let (session, _signals) =
        MeasurementSession::new(request, dataset.clone(), Arc::new(NullObserver), options).unwrap();
    assert!(session.run().await.is_success());
    dataset.snapshot().await
}

#[tokio::test]
async fn text_export_has_comment_header_and_rows() {
    let dataset = measured_dataset().await;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sweep.txt");

    assert_ok!(export_auto(&dataset, &path));

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "# Current (A),Voltage (V),Std.s");
    assert_eq!(lines.len(), dataset.len() + 1);
    assert_eq!(
        lines[1],
        "0.000000000000000000e+00,0.000000000000000000e+00,0.000000000000000000e+00"
    );
    assert!(lines[2].starts_with("1.000000000000000021e-03,"));
}

#[cfg(feature = "storage_csv")]
#[tokio::test]
async fn csv_export_round_trips_values() {
    let dataset = measured_dataset().await;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("sweep.csv");

    let written = export(&dataset, &path, ExportFormat::Csv).unwrap();
    assert_eq!(written, path);

    let mut reader = csv::Reader::from_path(&path).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(
        headers.iter().collect::<Vec<_>>(),
        vec!["Current (A)", "Voltage (V)", "Std.s"]
    );

    let rows: Vec<Vec<f64>> = reader
        .records()
        .map(|r| r.unwrap().iter().map(|f| f.parse().unwrap()).collect())
        .collect();
    assert_eq!(rows.len(), dataset.len());
    for (row, (i, v)) in rows
        .iter()
        .zip(dataset.currents().iter().zip(dataset.voltages()))
    {
        assert_eq!(row[0], *i);
        assert_eq!(row[1], *v);
    }
}

#[cfg(feature = "storage_arrow")]
#[tokio::test]
async fn arrow_export_has_named_float_columns() {
    use arrow::array::Float64Array;
    use arrow::ipc::reader::FileReader;

    let dataset = measured_dataset().await;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sweep.arrow");
    export_auto(&dataset, &path).unwrap();

    let file = std::fs::File::open(&path).unwrap();
    let mut reader = FileReader::try_new(file, None).unwrap();
    let batch = reader.next().unwrap().unwrap();
    let schema = batch.schema();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    assert_eq!(names, vec!["Current", "Voltage", "stdS"]);

    let currents = batch
        .column(0)
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    assert_eq!(currents.values().to_vec(), dataset.currents().to_vec());
}

#[test]
fn unsupported_format_creates_no_file() {
    let dataset = Dataset::from_columns(vec![0.0, 1e-3], vec![0.0, 0.1], vec![0.0, 0.0]).unwrap();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sweep.npz");

    let err = assert_err!(export_auto(&dataset, &path));
    assert!(matches!(err, IvError::UnsupportedFormat(_)));
    assert!(!path.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    assert!(matches!(
        "hdf5".parse::<ExportFormat>(),
        Err(IvError::UnsupportedFormat(_))
    ));
}

#[test]
fn destination_is_checked_without_touching_disk() {
    let dir = TempDir::new().unwrap();

    let err = assert_err!(check_destination(&dir.path().join("run.npz")));
    assert!(matches!(err, IvError::UnsupportedFormat(_)));
    assert!(matches!(
        check_destination(&dir.path().join("run")),
        Err(IvError::UnsupportedFormat(_))
    ));
    assert_eq!(
        assert_ok!(check_destination(&dir.path().join("run.TXT"))),
        ExportFormat::Text
    );

    if !cfg!(feature = "storage_arrow") {
        assert!(matches!(
            check_destination(&dir.path().join("run.arrow")),
            Err(IvError::FeatureNotEnabled(_))
        ));
    }
    if cfg!(feature = "storage_csv") {
        assert_eq!(
            assert_ok!(check_destination(&dir.path().join("run.csv"))),
            ExportFormat::Csv
        );
    }

    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn refreshed_dataset_still_exports() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.txt");
    assert_ok!(export(&Dataset::refreshed(), &path, ExportFormat::Text));
    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 2);
}

#[tokio::test]
async fn completed_sweep_fits_resistance() {
    let dataset = measured_dataset().await;
    let fit = dataset.fit().unwrap();
    assert!((fit.slope - 200.0).abs() < 1e-6);
    assert!(fit.intercept.abs() < 1e-9);
}
