//! Use-case loading.
//!
//! A use-case file names one or more query-mix directories (`querymix=<dir>`
//! lines). Each directory numbers its queries from 1; the loader lays the
//! directories end to end in one ordinal space, each directory spanning up to
//! the highest ordinal its run references. The mapping is kept in an
//! [`OrdinalRemap`] built once while loading.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{DriverError, Result};
use crate::query::{Query, QueryDescription, TemplateSyntax};
use crate::querymix::Workload;

pub const QUERYMIX_FILE: &str = "querymix.txt";
pub const IGNORE_FILE: &str = "ignoreQueries.txt";

/// Local-to-global ordinal table for the loaded query-mix directories
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrdinalRemap {
    /// Global offset of each directory
    offsets: Vec<usize>,
    /// Highest local ordinal of each directory
    spans: Vec<usize>,
}

impl OrdinalRemap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a directory spanning `span` ordinals; returns its offset
    pub fn push(&mut self, span: usize) -> usize {
        let offset = self.total();
        self.offsets.push(offset);
        self.spans.push(span);
        offset
    }

    /// Global ordinal of local ordinal `local` in directory `dir`
    pub fn global(&self, dir: usize, local: usize) -> Option<usize> {
        let span = *self.spans.get(dir)?;
        if local == 0 || local > span {
            return None;
        }
        Some(self.offsets[dir] + local)
    }

    /// Directory index and local ordinal of a global ordinal
    pub fn locate(&self, global: usize) -> Option<(usize, usize)> {
        if global == 0 {
            return None;
        }
        self.offsets
            .iter()
            .zip(&self.spans)
            .position(|(offset, span)| global > *offset && global <= offset + span)
            .map(|dir| (dir, global - self.offsets[dir]))
    }

    /// Size of the combined ordinal space
    pub fn total(&self) -> usize {
        match (self.offsets.last(), self.spans.last()) {
            (Some(offset), Some(span)) => offset + span,
            _ => 0,
        }
    }

    pub fn directories(&self) -> usize {
        self.spans.len()
    }
}

/// Query-mix directories listed by a use-case file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseCase {
    pub querymix_dirs: Vec<PathBuf>,
}

impl UseCase {
    /// Parse use-case text; relative directories resolve against `base`
    pub fn parse(text: &str, base: &Path) -> std::result::Result<Self, String> {
        let mut querymix_dirs = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(format!("Invalid use-case line: {}", line));
            };
            if key.trim().eq_ignore_ascii_case("querymix") {
                querymix_dirs.push(base.join(value.trim()));
            }
        }
        if querymix_dirs.is_empty() {
            return Err("no querymix entries".to_string());
        }
        Ok(Self { querymix_dirs })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text =
            std::fs::read_to_string(path).map_err(|e| DriverError::load(path, e.to_string()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&text, base).map_err(|e| DriverError::load(path, e))
    }
}

/// Options affecting how query files are read
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    pub syntax: TemplateSyntax,
    /// Also read `query<N>valid.txt` row names
    pub qualification: bool,
}

/// Result of loading a use case
#[derive(Debug)]
pub struct LoadedWorkload {
    pub workload: Workload,
    pub remap: OrdinalRemap,
}

/// Load every query-mix directory of `usecase` into one workload
pub fn load_workload(usecase: &UseCase, options: LoadOptions) -> Result<LoadedWorkload> {
    let mut remap = OrdinalRemap::new();
    let mut queries: Vec<Option<Query>> = Vec::new();
    let mut run_sequence = Vec::new();
    let mut ignore_mask = Vec::new();

    for (dir_index, dir) in usecase.querymix_dirs.iter().enumerate() {
        let local_run = read_ordinals(&dir.join(QUERYMIX_FILE))?;
        let span = local_run.iter().copied().max().unwrap_or(0);
        if span == 0 {
            return Err(DriverError::load(dir.join(QUERYMIX_FILE), "empty query mix"));
        }
        let offset = remap.push(span);

        let mut local_ignore = vec![false; span];
        let ignore_path = dir.join(IGNORE_FILE);
        if ignore_path.exists() {
            for ordinal in read_ordinals(&ignore_path)? {
                // out-of-range entries are dropped
                if let Some(flag) = ordinal.checked_sub(1).and_then(|i| local_ignore.get_mut(i)) {
                    *flag = true;
                }
            }
        }

        let mut dir_queries: Vec<Option<Query>> = vec![None; span];
        let referenced: BTreeSet<usize> = local_run.iter().copied().collect();
        for local in referenced {
            let global = remap
                .global(dir_index, local)
                .ok_or_else(|| DriverError::Internal(anyhow::anyhow!("ordinal {} out of span", local)))?;
            dir_queries[local - 1] = Some(read_query(dir, local, global, options)?);
        }

        for local in &local_run {
            if let Some(global) = remap.global(dir_index, *local) {
                run_sequence.push(global);
            }
        }
        queries.extend(dir_queries);
        ignore_mask.extend(local_ignore);

        tracing::debug!(
            dir = %dir.display(),
            span,
            offset,
            "Loaded query mix directory"
        );
    }

    let workload = Workload::new(queries, run_sequence, ignore_mask)?;
    tracing::info!(
        directories = remap.directories(),
        queries = workload.queries().iter().flatten().count(),
        run_length = workload.run_sequence().len(),
        "Workload loaded"
    );
    Ok(LoadedWorkload { workload, remap })
}

/// Whitespace-separated positive ordinals
fn read_ordinals(path: &Path) -> Result<Vec<usize>> {
    let text = std::fs::read_to_string(path).map_err(|e| DriverError::load(path, e.to_string()))?;
    text.split_whitespace()
        .map(|token| match token.parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(DriverError::load(path, format!("invalid query number '{}'", token))),
        })
        .collect()
}

fn read_query(dir: &Path, local: usize, global: usize, options: LoadOptions) -> Result<Query> {
    let template_path = dir.join(format!("query{}.txt", local));
    let desc_path = dir.join(format!("query{}desc.txt", local));

    let template = std::fs::read_to_string(&template_path)
        .map_err(|e| DriverError::load(&template_path, e.to_string()))?;
    let desc_text = std::fs::read_to_string(&desc_path)
        .map_err(|e| DriverError::load(&desc_path, e.to_string()))?;
    let description =
        QueryDescription::parse(&desc_text).map_err(|e| DriverError::load(&desc_path, e))?;

    let mut query = Query::new(global, description.query_type, template, options.syntax)
        .with_slots(description.slots);

    if options.qualification {
        let valid_path = dir.join(format!("query{}valid.txt", local));
        if valid_path.exists() {
            let text = std::fs::read_to_string(&valid_path)
                .map_err(|e| DriverError::load(&valid_path, e.to_string()))?;
            query = query.with_row_names(text.split_whitespace().map(String::from).collect());
        }
    }
    Ok(query)
}
