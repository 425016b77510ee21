//! JSON loading for the pipeline configuration and the reference lookup tables.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::domain::{PipelineConfig, ReferenceData};
use crate::error::{Error, Result};

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path).map(BufReader::new).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse and validate a `PipelineConfig`. Missing fields take their defaults.
pub fn read_config<R: Read>(reader: R) -> Result<PipelineConfig> {
    let config: PipelineConfig = serde_json::from_reader(reader)?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    read_config(open(path)?)
}

pub fn read_reference<R: Read>(reader: R) -> Result<ReferenceData> {
    Ok(serde_json::from_reader(reader)?)
}

pub fn load_reference(path: &Path) -> Result<ReferenceData> {
    read_reference(open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Population;

    #[test]
    fn config_fills_defaults() {
        let json = r#"{
            "sub_regions": {"codes": {"WA": "Washington"}, "exclusions": ["D.C."]},
            "aggregates": [{"name": "World", "lat": 0.0, "lon": 0.0}]
        }"#;
        let config = read_config(json.as_bytes()).unwrap();

        assert_eq!(config.sub_regions.codes["WA"], "Washington");
        assert_eq!(config.aggregates[0].name, "World");
        assert!(config.aggregates[0].include.is_empty());
        assert_eq!(config.solver, PipelineConfig::default().solver);
        assert!(config.parallel);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let json = r#"{"solver": {"max_iterations": 0}}"#;
        assert!(matches!(read_config(json.as_bytes()), Err(Error::Config(_))));

        assert!(matches!(read_config("{".as_bytes()), Err(Error::Json(_))));
    }

    #[test]
    fn reference_accepts_mixed_population_cells() {
        let json = r#"{
            "populations": {"Italy": 60461826, "Spain": "46,754,778", "Atlantis": "n/a"},
            "age_samples": {"Italy": [34, 61, 80]}
        }"#;
        let reference = read_reference(json.as_bytes()).unwrap();

        assert_eq!(reference.population("Italy"), Population::Known(60_461_826));
        assert_eq!(reference.population("Spain"), Population::Known(46_754_778));
        assert_eq!(reference.population("Atlantis"), Population::Unknown);
        assert_eq!(reference.population("Narnia"), Population::Unknown);
        assert_eq!(reference.age_samples["Italy"], vec![34, 61, 80]);
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_config(Path::new("/nonexistent/epi-config.json")).unwrap_err();
        assert!(err.to_string().contains("epi-config.json"));
    }
}
