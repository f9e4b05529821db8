use geo_types::{Geometry, LineString, Point, Polygon};
use krng::{CancelToken, Secret};
use vwm::{
    detect_fictitious, detect_fictitious_any, detect_geometries, detect_geometries_any,
    embed_fictitious, embed_geometries, io, ReadOptions, Value, VectorDataset, VwmError,
};

fn secret() -> Secret {
    Secret::new("process-secret")
}

fn tabular(rows: usize) -> VectorDataset {
    VectorDataset::new(
        vec![
            "parcel".to_string(),
            "owner".to_string(),
            "area".to_string(),
        ],
        vec![
            (0..rows).map(|i| Value::Int(i as i64)).collect(),
            (0..rows)
                .map(|i| Value::Str(format!("owner {}", i * 3 + 11)))
                .collect(),
            (0..rows)
                .map(|i| Value::Float(i as f64 / 8.0 + 0.625))
                .collect(),
        ],
        None,
    )
}

fn geometric(rows: usize) -> VectorDataset {
    let geometries: Vec<Geometry<f64>> = (0..rows)
        .map(|i| {
            let base = i as f64;
            match i % 3 {
                0 => Geometry::Point(Point::new(base, base + 0.5)),
                1 => Geometry::LineString(LineString::from(vec![
                    (base, 0.25),
                    (base + 1.5, 0.75),
                    (base + 3.0, 0.25),
                    (base + 4.5, 1.25),
                ])),
                _ => Geometry::Polygon(Polygon::new(
                    LineString::from(vec![
                        (base, base),
                        (base + 2.0, base),
                        (base + 2.0, base + 2.0),
                        (base, base + 2.0),
                        (base, base),
                    ]),
                    Vec::new(),
                )),
            }
        })
        .collect();
    let mut df = tabular(rows).with_geometry(geometries);
    df.geometry_column = Some("wkt".to_string());
    df
}

#[test]
fn test_fictitious_roundtrip() {
    let df = tabular(10_000);
    let cancel = CancelToken::new();
    let marked = embed_fictitious(&df, "U", &secret(), &cancel).unwrap();
    assert_eq!(10_010, marked.len());

    assert!(detect_fictitious(&df, &marked, "U", &secret(), &cancel).unwrap());
    assert!(!detect_fictitious(&df, &marked, "V", &secret(), &cancel).unwrap());
    // the untouched dataset carries no marker
    assert!(!detect_fictitious(&df, &df, "U", &secret(), &cancel).unwrap());
}

#[test]
fn test_fictitious_detect_matches_id_among_many() {
    let df = tabular(2_000);
    let cancel = CancelToken::new();
    let marked = embed_fictitious(&df, "the-real-one", &secret(), &cancel).unwrap();
    let ids: Vec<String> = ["a", "b", "the-real-one", "c"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let matched = detect_fictitious_any(&df, &marked, &ids, &secret(), &cancel).unwrap();
    assert_eq!(Some("the-real-one".to_string()), matched);
}

#[test]
fn test_fictitious_short_dataset_gains_nothing() {
    let df = tabular(99);
    let cancel = CancelToken::new();
    let marked = embed_fictitious(&df, "U", &secret(), &cancel).unwrap();
    assert_eq!(99, marked.len());
    assert!(!detect_fictitious(&df, &marked, "U", &secret(), &cancel).unwrap());
}

#[test]
fn test_fictitious_survives_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let df = tabular(3_000);
    let cancel = CancelToken::new();
    let marked = embed_fictitious(&df, "persisted", &secret(), &cancel).unwrap();

    let path = dir.path().join("marked.csv");
    io::write_dataset(&marked, &path, ",").unwrap();
    let read_back = io::read_dataset(&path, &ReadOptions::default()).unwrap();
    assert_eq!(marked.len(), read_back.len());

    assert!(detect_fictitious(&df, &read_back, "persisted", &secret(), &cancel).unwrap());
    assert!(!detect_fictitious(&df, &read_back, "other", &secret(), &cancel).unwrap());
}

#[test]
fn test_fictitious_requires_secret() {
    let df = tabular(1_000);
    let cancel = CancelToken::new();
    let result = embed_fictitious(&df, "U", &Secret::new(""), &cancel);
    assert!(matches!(result, Err(VwmError::Uninitialized)));
}

#[test]
fn test_fictitious_honors_cancellation() {
    let df = tabular(1_000);
    let cancel = CancelToken::new();
    cancel.cancel();
    let result = embed_fictitious(&df, "U", &secret(), &cancel);
    assert!(matches!(result, Err(VwmError::Canceled)));
}

#[test]
fn test_geometries_roundtrip() {
    let df = geometric(1_500);
    let cancel = CancelToken::new();
    let marked = embed_geometries(&df, "G", &secret(), &cancel).unwrap();
    assert_eq!(df.len(), marked.len());

    assert!(detect_geometries(&df, &marked, "G", &secret(), &cancel).unwrap());
    assert!(!detect_geometries(&df, &marked, "H", &secret(), &cancel).unwrap());
    assert!(!detect_geometries(&df, &df, "G", &secret(), &cancel).unwrap());
}

#[test]
fn test_geometries_detect_matches_id_among_many() {
    let df = geometric(900);
    let cancel = CancelToken::new();
    let marked = embed_geometries(&df, "winner", &secret(), &cancel).unwrap();
    let ids: Vec<String> = ["x", "winner", "y"].iter().map(|s| s.to_string()).collect();
    let matched = detect_geometries_any(&df, &marked, &ids, &secret(), &cancel).unwrap();
    assert_eq!(Some("winner".to_string()), matched);
}

#[test]
fn test_geometries_survive_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let df = geometric(600);
    let cancel = CancelToken::new();
    let marked = embed_geometries(&df, "on-disk", &secret(), &cancel).unwrap();

    let path = dir.path().join("marked.csv");
    io::write_dataset(&marked, &path, ",").unwrap();
    let options = ReadOptions {
        geom: Some("wkt".to_string()),
        ..ReadOptions::default()
    };
    let read_back = io::read_dataset(&path, &options).unwrap();
    assert_eq!(marked.len(), read_back.len());

    assert!(detect_geometries(&df, &read_back, "on-disk", &secret(), &cancel).unwrap());
    assert!(!detect_geometries(&df, &read_back, "elsewhere", &secret(), &cancel).unwrap());
}

#[test]
fn test_geometries_reject_non_geometric() {
    let df = tabular(1_000);
    let cancel = CancelToken::new();
    let result = embed_geometries(&df, "G", &secret(), &cancel);
    assert!(matches!(result, Err(VwmError::NotGeometric)));
    let result = detect_geometries(&df, &df, "G", &secret(), &cancel);
    assert!(matches!(result, Err(VwmError::NotGeometric)));
}

#[test]
fn test_tsv_reads_with_tab_delimiter() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("suspect.tsv");
    std::fs::write(&path, "a\tb\n1\tfirst\n2\tsecond\n").unwrap();
    let df = io::read_dataset(&path, &ReadOptions::default()).unwrap();
    assert_eq!(2, df.len());
    assert_eq!(&Value::Int(2), df.value(0, 1));
    assert_eq!(&Value::Str("second".to_string()), df.value(1, 1));
}

#[test]
fn test_two_character_delimiter_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dataset.txt");
    std::fs::write(&path, "a||b\n1||one\n2||two\n").unwrap();
    let options = ReadOptions {
        delimiter: Some("||".to_string()),
        ..ReadOptions::default()
    };
    let df = io::read_dataset(&path, &options).unwrap();
    assert_eq!(2, df.len());

    let out = dir.path().join("copy.txt");
    io::write_dataset(&df, &out, "||").unwrap();
    let back = io::read_dataset(&out, &options).unwrap();
    assert_eq!(df.row_at(0), back.row_at(0));
    assert_eq!(df.row_at(1), back.row_at(1));
}

#[test]
fn test_latlon_builds_point_geometry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("points.csv");
    std::fs::write(&path, "id,lat,lon\n1,37.9,23.7\n2,40.6,22.9\n").unwrap();
    let options = ReadOptions {
        lat: Some("lat".to_string()),
        lon: Some("lon".to_string()),
        crs: Some("EPSG:4326".to_string()),
        ..ReadOptions::default()
    };
    let df = io::read_dataset(&path, &options).unwrap();
    assert!(df.has_geometry());
    assert_eq!(Some("EPSG:4326".to_string()), df.crs);
    match &df.geometry_opt().unwrap()[0] {
        Geometry::Point(p) => {
            assert_eq!(23.7, p.x());
            assert_eq!(37.9, p.y());
        }
        other => panic!("unexpected {:?}", other),
    }
    // lat/lon stay as table columns, so no extra geometry column on write
    let out = dir.path().join("copy.csv");
    io::write_dataset(&df, &out, ",").unwrap();
    let text = std::fs::read_to_string(&out).unwrap();
    assert!(text.starts_with("id,lat,lon\n"));
}
