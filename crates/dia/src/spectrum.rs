use serde::{Deserialize, Serialize};

/// A single scan as delivered by an external raw-file reader
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct Ms2Scan {
    pub scan_number: u32,
    /// MSn level; only level 2 scans are indexed
    #[serde(default = "default_level")]
    pub ms_level: u8,
    /// Retention time, in minutes
    pub rt: f32,
    /// Isolation window center
    pub isolation_mz: Option<f32>,
    /// Full isolation window width, in m/z
    #[serde(default)]
    pub isolation_width: f32,
    pub mz: Vec<f32>,
    pub intensity: Vec<f32>,
}

fn default_level() -> u8 {
    2
}

impl Ms2Scan {
    pub fn new(
        scan_number: u32,
        rt: f32,
        isolation_mz: f32,
        isolation_width: f32,
        mz: Vec<f32>,
        intensity: Vec<f32>,
    ) -> Self {
        Ms2Scan {
            scan_number,
            ms_level: 2,
            rt,
            isolation_mz: Some(isolation_mz),
            isolation_width,
            mz,
            intensity,
        }
    }

    /// Scans that can take part in DIA extraction: MS2, with an isolation
    /// center and at least one (paired) peak
    pub fn is_indexable(&self) -> bool {
        self.ms_level == 2
            && self.isolation_mz.map(f32::is_finite).unwrap_or(false)
            && !self.mz.is_empty()
            && self.mz.len() == self.intensity.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn indexable() {
        let scan = Ms2Scan::new(1, 1.0, 500.0, 25.0, vec![100.0], vec![1.0]);
        assert!(scan.is_indexable());

        let mut ms1 = scan.clone();
        ms1.ms_level = 1;
        assert!(!ms1.is_indexable());

        let mut empty = scan.clone();
        empty.mz.clear();
        empty.intensity.clear();
        assert!(!empty.is_indexable());

        let mut no_isolation = scan;
        no_isolation.isolation_mz = None;
        assert!(!no_isolation.is_indexable());
    }

    #[test]
    fn deserialize_defaults() {
        let json = r#"{"scan_number": 7, "rt": 1.5, "isolation_mz": 612.5,
            "mz": [200.0], "intensity": [10.0]}"#;
        let scan: Ms2Scan = serde_json::from_str(json).unwrap();
        assert_eq!(scan.ms_level, 2);
        assert_eq!(scan.isolation_width, 0.0);
        assert!(scan.is_indexable());
    }
}
