//! CSV telemetry (spec §6 "CSV telemetry"): one file per day, header
//! written once, every subsequent row appended and flushed. Grounded on the
//! append-and-flush file idiom of `io/temperatures/file.rs`.

use chrono::{DateTime, NaiveDate, Utc};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const HEADER: &str = "timestamp,boiler_state,flame_on,room,room_mode,calling,valve_percent,flow_temp_c,return_temp_c,cycling_state,load_sharing_active,outside_temp_c";

#[derive(Clone, Debug)]
pub struct TelemetryRow {
    pub at: DateTime<Utc>,
    pub boiler_state: String,
    pub flame_on: bool,
    pub room: String,
    pub room_mode: String,
    pub calling: bool,
    pub valve_percent: u8,
    pub flow_temp_c: f32,
    pub return_temp_c: f32,
    pub cycling_state: String,
    pub load_sharing_active: bool,
    pub outside_temp_c: Option<f32>,
}

impl TelemetryRow {
    fn to_csv_line(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{:.1},{:.1},{},{},{}",
            self.at.to_rfc3339(),
            self.boiler_state,
            self.flame_on,
            self.room,
            self.room_mode,
            self.calling,
            self.valve_percent,
            self.flow_temp_c,
            self.return_temp_c,
            self.cycling_state,
            self.load_sharing_active,
            self.outside_temp_c.map(|t| format!("{t:.1}")).unwrap_or_default(),
        )
    }
}

pub struct TelemetryWriter {
    dir: PathBuf,
    current_day: Option<NaiveDate>,
}

impl TelemetryWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        TelemetryWriter {
            dir: dir.into(),
            current_day: None,
        }
    }

    fn path_for(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.csv", day.format("%Y-%m-%d")))
    }

    pub fn write_row(&mut self, row: &TelemetryRow) -> io::Result<()> {
        let day = row.at.date_naive();
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(day);
        let needs_header = self.current_day != Some(day) || !path.exists();
        let write_header = needs_header && !file_has_content(&path);

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if write_header {
            writeln!(file, "{HEADER}")?;
        }
        writeln!(file, "{}", row.to_csv_line())?;
        file.flush()?;
        self.current_day = Some(day);
        Ok(())
    }
}

fn file_has_content(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_util::test_utils::utc_datetime;

    fn row(at: DateTime<Utc>) -> TelemetryRow {
        TelemetryRow {
            at,
            boiler_state: "ON".into(),
            flame_on: true,
            room: "lounge".into(),
            room_mode: "auto".into(),
            calling: true,
            valve_percent: 60,
            flow_temp_c: 65.2,
            return_temp_c: 48.1,
            cycling_state: "NORMAL".into(),
            load_sharing_active: false,
            outside_temp_c: Some(8.3),
        }
    }

    #[test]
    fn writes_header_once_then_appends() {
        let dir = std::env::temp_dir().join("heating_core_test_telemetry");
        std::fs::remove_dir_all(&dir).ok();
        let mut writer = TelemetryWriter::new(&dir);
        let now = utc_datetime(2024, 1, 1, 10, 0, 0);

        writer.write_row(&row(now)).unwrap();
        writer.write_row(&row(now + chrono::Duration::minutes(1))).unwrap();

        let path = dir.join("2024-01-01.csv");
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rolls_over_to_new_file_on_day_change() {
        let dir = std::env::temp_dir().join("heating_core_test_telemetry_rollover");
        std::fs::remove_dir_all(&dir).ok();
        let mut writer = TelemetryWriter::new(&dir);
        let day1 = utc_datetime(2024, 1, 1, 23, 59, 0);
        let day2 = utc_datetime(2024, 1, 2, 0, 1, 0);

        writer.write_row(&row(day1)).unwrap();
        writer.write_row(&row(day2)).unwrap();

        assert!(dir.join("2024-01-01.csv").exists());
        assert!(dir.join("2024-01-02.csv").exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}
