//! Shared fixtures: GPX documents written into temporary folders.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Shape of a synthetic track.
#[derive(Debug, Clone)]
pub struct TrackFixture {
    pub latitude: f64,
    pub longitude: f64,
    pub start: DateTime<Utc>,
    pub points: usize,
    pub keywords: Option<String>,
}

impl TrackFixture {
    /// A 40 point wiggly ride starting in Zurich at `start` (RFC 3339).
    pub fn zurich(start: &str) -> Self {
        Self {
            latitude: 47.3769,
            longitude: 8.5417,
            start: DateTime::parse_from_rfc3339(start)
                .unwrap()
                .with_timezone(&Utc),
            points: 40,
            keywords: None,
        }
    }

    pub fn with_keywords(mut self, keywords: &str) -> Self {
        self.keywords = Some(keywords.to_string());
        self
    }

    pub fn to_gpx(&self) -> String {
        let points: Vec<(f64, f64, f64, DateTime<Utc>)> = (0..self.points)
            .map(|i| {
                let f = i as f64;
                (
                    self.latitude + f * 0.0005,
                    self.longitude + f * 0.0003 + (f * 0.4).sin() * 0.0002,
                    400.0 + (f / 3.0).sin() * 5.0,
                    self.start + Duration::seconds(30 * i as i64),
                )
            })
            .collect();
        gpx_document(&points, self.keywords.as_deref())
    }
}

/// A GPX 1.1 document with one track of one segment.
pub fn gpx_document(points: &[(f64, f64, f64, DateTime<Utc>)], keywords: Option<&str>) -> String {
    let mut doc = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <gpx version=\"1.1\" creator=\"fixture\" xmlns=\"http://www.topografix.com/GPX/1/1\">\n",
    );
    if let Some(keywords) = keywords {
        doc.push_str(&format!(
            "  <metadata><keywords>{keywords}</keywords></metadata>\n"
        ));
    }
    doc.push_str("  <trk><name>fixture</name><trkseg>\n");
    for (lat, lon, ele, time) in points {
        doc.push_str(&format!(
            "    <trkpt lat=\"{lat:.7}\" lon=\"{lon:.7}\"><ele>{ele:.2}</ele><time>{}</time></trkpt>\n",
            time.format("%Y-%m-%dT%H:%M:%SZ")
        ));
    }
    doc.push_str("  </trkseg></trk>\n</gpx>\n");
    doc
}

/// A track that moves back and forth between two coordinates.
pub fn two_point_gpx() -> String {
    let start = DateTime::parse_from_rfc3339("2023-06-01T07:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let points: Vec<_> = (0..6)
        .map(|i| {
            let lat = if i % 2 == 0 { 47.0 } else { 47.001 };
            (lat, 8.0, 400.0, start + Duration::seconds(60 * i))
        })
        .collect();
    gpx_document(&points, None)
}

pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

/// Write `count` valid tracks named `track-<n>.gpx`, one day apart.
pub fn write_tracks(dir: &Path, first: usize, count: usize) -> Vec<PathBuf> {
    (first..first + count)
        .map(|n| {
            let start = format!("2023-06-{:02}T06:30:00Z", n + 1);
            write_file(
                dir,
                &format!("track-{n}.gpx"),
                &TrackFixture::zurich(&start).to_gpx(),
            )
        })
        .collect()
}

/// Names of the files in `dir`, sorted.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
