use std::io::{self, Write};

use serde::Serialize;

use crate::app::{CatalogRunResult, InstanceCheck, MirrorRunResult, ProjectRunResult};
use crate::matrix::MatrixSummary;
use crate::tags::{PartitionSummary, TagSummary};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_catalogs(results: &[CatalogRunResult]) -> io::Result<()> {
        Self::print_json(&results)
    }

    pub fn print_checks(checks: &[InstanceCheck]) -> io::Result<()> {
        Self::print_json(&checks)
    }

    pub fn print_mirror(result: &MirrorRunResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_project(result: &ProjectRunResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_tags(result: &TagSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_partition(result: &PartitionSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_matrix(result: &MatrixSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Plain summaries for a terminal.
pub struct TextOutput;

impl TextOutput {
    pub fn print_catalogs(results: &[CatalogRunResult]) -> io::Result<()> {
        let mut out = io::stdout().lock();
        for result in results {
            writeln!(out, "{} ({})", result.instance, result.url)?;
            writeln!(
                out,
                "  datasets: {} ingested, {} without accepted formats, {} failed",
                result.datasets_ingested,
                result.datasets_without_formats,
                result.dispatch.failed
            )?;
            writeln!(
                out,
                "  resources: {} downloaded, {} already present, {} failed",
                result.resources_downloaded, result.resources_present, result.resources_failed
            )?;
            if result.dispatch.listing_errors > 0 {
                writeln!(out, "  listing errors: {}", result.dispatch.listing_errors)?;
            }
            if result.dispatch.cancelled {
                writeln!(out, "  cancelled, {} not started", result.dispatch.not_started)?;
            }
        }
        Ok(())
    }

    pub fn print_checks(checks: &[InstanceCheck]) -> io::Result<()> {
        let mut out = io::stdout().lock();
        for check in checks {
            match &check.error {
                None => writeln!(out, "ok      {} ({})", check.instance, check.url)?,
                Some(error) => writeln!(out, "failed  {} ({}): {error}", check.instance, check.url)?,
            }
        }
        let failing = checks
            .iter()
            .filter(|check| !check.ok)
            .map(|check| check.url.as_str())
            .collect::<Vec<_>>();
        if !failing.is_empty() {
            writeln!(out, "problem urls: {}", failing.join(", "))?;
        }
        Ok(())
    }

    pub fn print_project(result: &ProjectRunResult) -> io::Result<()> {
        writeln!(
            io::stdout(),
            "{}: {} linked datasets, {} tagged, {} untagged, {} failed",
            result.project,
            result.linked_datasets,
            result.tagged,
            result.untagged,
            result.dispatch.failed
        )
    }

    pub fn print_mirror(result: &MirrorRunResult) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(
            out,
            "objects: {} downloaded, {} already present, {} rejected by format, {} failed",
            result.downloaded,
            result.already_present,
            result.format_rejected,
            result.failed + result.dispatch.failed
        )?;
        writeln!(out, "batches: {}", result.dispatch.batches)
    }

    pub fn print_tags(result: &TagSummary) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(
            out,
            "{} of {} datasets tagged, {} distinct tags",
            result.labeled_datasets, result.datasets_scanned, result.distinct_tags
        )?;
        for entry in &result.top_tags {
            writeln!(out, "{:>6}  {}", entry.count, entry.tag)?;
        }
        writeln!(out, "dictionary: {}", result.dictionary_path)
    }

    pub fn print_partition(result: &PartitionSummary) -> io::Result<()> {
        writeln!(
            io::stdout(),
            "moved {} labeled datasets ({} unlabeled, {} conflicts)",
            result.moved, result.unlabeled, result.conflicts
        )
    }

    pub fn print_matrix(result: &MatrixSummary) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(
            out,
            "matrix {}x{} with {} entries",
            result.rows, result.cols, result.nnz
        )?;
        writeln!(out, "  {}", result.artifacts.matrix_path)?;
        writeln!(out, "  {}", result.artifacts.tags_path)?;
        writeln!(out, "  {}", result.artifacts.dataset_ids_path)
    }
}
