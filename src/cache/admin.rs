//! Cache Administration Module
//!
//! Listing of cached signatures and bulk invalidation by function name,
//! parameter substring, hash and partition range, across both tiers.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::engine::FileMemCache;
use crate::cache::glob_regex;
use crate::cache::key::{function_of_record, signature, CacheKey, PartitionToken};
use crate::cache::primary::Batch;
use crate::cache::{FUNC_DEF_SUFFIX, KEY_DELIMITER};
use crate::error::{CacheError, Result};

/// Cache tier selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Memory,
    File,
}

/// One cached signature and its function definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListEntry {
    pub signature: String,
    pub func_def: String,
}

impl fmt::Display for ListEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.signature, self.func_def)
    }
}

// == Invalidation Request ==
/// Filters selecting the entries to invalidate. Unset filters match everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    /// Function name; `*` acts as a wildcard
    pub function: Option<String>,
    /// Substring of the function-definition record
    pub params: Option<String>,
    /// First partition; alone it selects that partition only
    pub start: Option<String>,
    /// Last partition, inclusive; requires `start`
    pub end: Option<String>,
    /// Parameter hash
    pub hash: Option<String>,
    /// Clear the primary tier
    pub memory: bool,
    /// Clear the file tier
    pub file: bool,
    /// Log every deleted entry
    pub show: bool,
}

impl Default for Invalidation {
    fn default() -> Self {
        Self {
            function: None,
            params: None,
            start: None,
            end: None,
            hash: None,
            memory: true,
            file: true,
            show: false,
        }
    }
}

impl Invalidation {
    /// Matches every entry of the namespace in both tiers.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    pub fn params(mut self, params: impl Into<String>) -> Self {
        self.params = Some(params.into());
        self
    }

    pub fn start(mut self, start: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self
    }

    pub fn end(mut self, end: impl Into<String>) -> Self {
        self.end = Some(end.into());
        self
    }

    pub fn hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn memory_only(mut self) -> Self {
        self.memory = true;
        self.file = false;
        self
    }

    pub fn file_only(mut self) -> Self {
        self.memory = false;
        self.file = true;
        self
    }

    pub fn show(mut self) -> Self {
        self.show = true;
        self
    }

    fn partition_range(&self) -> Result<PartitionRange> {
        let parse = |label: &str, value: &str| {
            PartitionToken::from_token(value)
                .or_else(|| PartitionToken::parse(value))
                .ok_or_else(|| {
                    CacheError::InvalidRequest(format!("Invalid {} date '{}'", label, value))
                })
        };

        match (self.start.as_deref(), self.end.as_deref()) {
            (None, Some(_)) => Err(CacheError::InvalidRequest(
                "End date without a start date".to_string(),
            )),
            (None, None) => Ok(PartitionRange::default()),
            (Some(start), end) => Ok(PartitionRange {
                start: Some(parse("start", start)?),
                end: end.map(|end| parse("end", end)).transpose()?,
            }),
        }
    }
}

/// Partition filter. Tokens are fixed-width, so string order is date order.
#[derive(Debug, Default)]
struct PartitionRange {
    start: Option<PartitionToken>,
    end: Option<PartitionToken>,
}

impl PartitionRange {
    fn contains(&self, token: &PartitionToken) -> bool {
        match (&self.start, &self.end) {
            (None, _) => true,
            (Some(start), None) => token == start,
            (Some(start), Some(end)) => start <= token && token <= end,
        }
    }
}

/// Counts of entries removed by an invalidation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    pub memory_deleted: usize,
    pub files_deleted: usize,
}

impl InvalidationReport {
    pub fn total(&self) -> usize {
        self.memory_deleted + self.files_deleted
    }
}

impl FileMemCache {
    // == Listing ==
    /// Lists the signatures cached in one tier whose function name starts with `function`.
    ///
    /// With `show`, every entry and the total are logged as well.
    pub fn list(&self, tier: Tier, function: &str, show: bool) -> Result<Vec<ListEntry>> {
        let entries = match tier {
            Tier::Memory => self.list_memory(function)?,
            Tier::File => self.list_files(function)?,
        };
        if show {
            for entry in &entries {
                info!("{}", entry);
            }
            info!("Total : {} keys found", entries.len());
        }
        Ok(entries)
    }

    /// Signatures with at least one tracked key in the primary tier.
    pub fn list_memory(&self, function: &str) -> Result<Vec<ListEntry>> {
        let Some(primary) = &self.primary else {
            info!("Mem cache is disabled");
            return Ok(Vec::new());
        };

        let suffix = format!("{}{}", KEY_DELIMITER, FUNC_DEF_SUFFIX);
        let pattern = format!("{}{}{}*", self.namespace(), KEY_DELIMITER, function);
        let mut entries = Vec::new();

        for def_key in primary.scan_keys(&pattern)? {
            let Some(signature) = def_key.strip_suffix(&suffix) else {
                continue;
            };
            if primary.set_cardinality(signature)? == 0 {
                continue;
            }
            if let Some(def) = primary.get(&def_key)? {
                entries.push(ListEntry {
                    signature: signature.to_string(),
                    func_def: String::from_utf8_lossy(&def).into_owned(),
                });
            }
        }
        Ok(entries)
    }

    /// Signatures with at least one value file.
    pub fn list_files(&self, function: &str) -> Result<Vec<ListEntry>> {
        let Some(files) = &self.files else {
            info!("File cache is disabled");
            return Ok(Vec::new());
        };

        let namespace = self.namespace();
        let mut entries = Vec::new();
        for (hash, def) in files.function_defs(namespace)? {
            let name = function_of_record(&def);
            if !name.starts_with(function) || files.partitions(namespace, &hash)?.is_empty() {
                continue;
            }
            entries.push(ListEntry {
                signature: signature(namespace, name, &hash),
                func_def: def,
            });
        }
        Ok(entries)
    }

    // == Invalidation ==
    /// Deletes every entry matching the request from the selected tiers.
    ///
    /// Returns the number of deleted entries per tier; zero matches is a
    /// successful report, while store or filesystem failures are errors.
    pub fn invalidate(&self, request: &Invalidation) -> Result<InvalidationReport> {
        let range = request.partition_range()?;
        let function = request.function.as_deref().map(glob_regex).transpose()?;

        let mut report = InvalidationReport::default();
        if request.memory {
            report.memory_deleted = self.invalidate_memory(request, &range, function.as_ref())?;
        }
        if request.file {
            report.files_deleted = self.invalidate_files(request, &range, function.as_ref())?;
        }

        if report.total() == 0 {
            info!("No entry with matching fingerprint found, nothing was deleted");
        } else {
            info!(
                "Invalidated {} memory keys and {} files",
                report.memory_deleted, report.files_deleted
            );
        }
        Ok(report)
    }

    fn invalidate_memory(
        &self,
        request: &Invalidation,
        range: &PartitionRange,
        function: Option<&Regex>,
    ) -> Result<usize> {
        let Some(primary) = &self.primary else {
            info!("Mem cache is disabled");
            return Ok(0);
        };

        let sets = format!(
            "{ns}{d}{func}{d}{hash}",
            ns = self.namespace(),
            func = request.function.as_deref().unwrap_or("*"),
            hash = request.hash.as_deref().unwrap_or("*"),
            d = KEY_DELIMITER
        );
        let mut candidates: BTreeSet<String> = primary
            .scan_keys(&format!("{}{}*", sets, KEY_DELIMITER))?
            .into_iter()
            .collect();

        // Expired values drop out of scans while their signature sets still
        // track them; those members are untracked as well.
        for set in primary.scan_keys(&sets)? {
            if set.split(KEY_DELIMITER).count() == 3 {
                candidates.extend(primary.set_members(&set)?);
            }
        }

        // The store may only honour prefixes, so every filter is re-applied here.
        let mut defs: HashMap<String, Option<String>> = HashMap::new();
        let mut matched = Vec::new();
        for rendered in candidates {
            let Ok(key) = CacheKey::parse(&rendered) else {
                continue;
            };
            if key.namespace() != self.namespace()
                || function.is_some_and(|re| !re.is_match(key.function()))
                || request.hash.as_deref().is_some_and(|hash| key.hash() != hash)
                || !range.contains(key.partition())
            {
                continue;
            }
            if let Some(params) = request.params.as_deref() {
                let def = match defs.get(&key.signature()) {
                    Some(def) => def.clone(),
                    None => {
                        let def = primary
                            .get(&key.func_def_key())?
                            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
                        defs.insert(key.signature(), def.clone());
                        def
                    }
                };
                if !def.is_some_and(|def| def.contains(params)) {
                    continue;
                }
            }
            matched.push(key);
        }

        if matched.is_empty() {
            return Ok(0);
        }

        let mut batch = Batch::new().delete(matched.iter().map(ToString::to_string).collect());
        for key in &matched {
            batch = batch.set_remove(key.signature(), key.to_string());
        }
        primary.execute(batch)?;

        if request.show {
            for key in &matched {
                info!("Deleted : {}", key);
            }
            info!("Total : {} keys deleted from MEMORY", matched.len());
        }
        Ok(matched.len())
    }

    fn invalidate_files(
        &self,
        request: &Invalidation,
        range: &PartitionRange,
        function: Option<&Regex>,
    ) -> Result<usize> {
        let Some(files) = &self.files else {
            info!("File cache is disabled");
            return Ok(0);
        };

        let namespace = self.namespace();
        let mut count = 0;
        for hash in files.signature_hashes(namespace)? {
            if request.hash.as_deref().is_some_and(|wanted| wanted != hash) {
                continue;
            }
            if function.is_some() || request.params.is_some() {
                let Some(def) = files.function_def(namespace, &hash)? else {
                    continue;
                };
                if function.is_some_and(|re| !re.is_match(function_of_record(&def)))
                    || request
                        .params
                        .as_deref()
                        .is_some_and(|params| !def.contains(params))
                {
                    continue;
                }
            }

            let deleted = files.remove_partitions(namespace, &hash, |p| range.contains(p))?;
            if request.show {
                for path in &deleted {
                    info!("Deleted : {}", path.display());
                }
            }
            count += deleted.len();
        }

        if request.show {
            info!("Total : {} FILES deleted", count);
        }
        Ok(count)
    }
}
