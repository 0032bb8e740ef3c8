use super::input::Search;
use anyhow::Context;
use dia_core::library::LibraryPrecursor;
use dia_core::pipeline::Pipeline;
use dia_core::spectrum::Ms2Scan;
use log::info;
use std::path::PathBuf;
use std::time::Instant;

pub struct Runner {
    pub parameters: Search,
    start: Instant,
}

impl Runner {
    pub fn new(parameters: Search) -> Self {
        Runner {
            parameters,
            start: Instant::now(),
        }
    }

    pub(crate) fn make_path<S: AsRef<str>>(&self, file_name: S) -> PathBuf {
        self.parameters.output_directory.join(file_name.as_ref())
    }

    fn read_inputs(&self) -> anyhow::Result<(Vec<Ms2Scan>, Vec<LibraryPrecursor>)> {
        let scans: Vec<Ms2Scan> = dia_core::read_json(&self.parameters.scans)
            .with_context(|| format!("Failed to read scans from `{}`", self.parameters.scans))?;
        let library: Vec<LibraryPrecursor> = dia_core::read_json(&self.parameters.library)
            .with_context(|| {
                format!("Failed to read library from `{}`", self.parameters.library)
            })?;
        info!(
            "read {} scans and {} library precursors in {:#?}",
            scans.len(),
            library.len(),
            self.start.elapsed()
        );
        Ok((scans, library))
    }

    /// Run the pipeline and write every output file, returning the final
    /// parameters along with the paths written
    pub fn run(mut self) -> anyhow::Result<Search> {
        let (scans, library) = self.read_inputs()?;

        let output = Pipeline::run(&scans, &library, &self.parameters.parameters())
            .context("DIA search failed")?;
        drop(scans);

        match &output.fdr {
            Some(fdr) => {
                info!(
                    "discovered {} target precursors at {}% FDR",
                    fdr.ids_at_1pct,
                    self.parameters.fdr.q_value_threshold * 100.0
                );
                log::debug!("{}", fdr.classifier.describe_weights());
            }
            None => info!("scored {} precursors without FDR control", output.results.len()),
        }
        log::trace!("writing outputs");

        let path = self.write_results(&output.results, &output.features)?;
        self.parameters.output_paths.push(path);

        if let Some(fdr) = &output.fdr {
            let path = self.write_fdr_iterations(&fdr.diagnostics)?;
            self.parameters.output_paths.push(path);
        }
        if let Some(model) = &output.calibration {
            let path = self.write_calibration(model)?;
            self.parameters.output_paths.push(path);
        }

        let path = self.make_path("results.json");
        self.parameters
            .output_paths
            .push(path.display().to_string());
        println!("{}", serde_json::to_string_pretty(&self.parameters)?);
        let bytes = serde_json::to_vec_pretty(&self.parameters)?;
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write `{}`", path.display()))?;

        info!("finished in {}s", self.start.elapsed().as_secs());
        Ok(self.parameters)
    }
}
