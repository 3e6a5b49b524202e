//! Run statistics and the results record.
//!
//! Every stage of the pipeline feeds a single [`RunStats`] counter block.
//! [`Results`] wraps the counters with the discovered link groups, run
//! timing, and the options the run was performed with, and knows how to
//! render itself as the human-readable report.  Machine output is plain
//! serde serialization of the same record.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::options::Options;
use crate::path::PathSplit;

/// Counters accumulated over a run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub dir_count: u64,
    pub file_count: u64,
    pub file_too_small_count: u64,
    pub file_too_large_count: u64,
    pub comparison_count: u64,
    pub inode_count: u64,
    pub inode_removed_count: u64,
    pub nlink_count: u64,
    pub prev_link_count: u64,
    pub new_link_count: u64,
    pub prev_linked_byte_amount: u64,
    pub inode_removed_byte_amount: u64,

    // Files that compared equal but had some mismatching inode parameter.
    // Useful for tuning the ignore flags on a subsequent run.
    pub mismatched_mtime_count: u64,
    pub mismatched_mode_count: u64,
    pub mismatched_uid_count: u64,
    pub mismatched_gid_count: u64,
    pub mismatched_xattr_count: u64,
    pub mismatched_total_count: u64,
    pub mismatched_mtime_bytes: u64,
    pub mismatched_mode_bytes: u64,
    pub mismatched_uid_bytes: u64,
    pub mismatched_gid_bytes: u64,
    pub mismatched_xattr_bytes: u64,
    pub mismatched_total_bytes: u64,
    pub bytes_compared: u64,

    // Debugging counts
    pub equal_comparison_count: u64,
    pub found_hash_count: u64,
    pub missed_hash_count: u64,
    pub hash_mismatch_count: u64,
    pub ino_seq_search_count: u64,
    pub ino_seq_iteration_count: u64,
    pub digest_computed_count: u64,
    pub compare_error_count: u64,
    pub link_error_count: u64,
    pub quiescence_violation_count: u64,
}

/// Everything a run produces besides its filesystem side effects.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Results {
    /// Pre-existing hardlink groups: source path to its other paths.
    pub existing_links: BTreeMap<String, Vec<String>>,
    /// Per-source file size for each existing-link group.
    pub existing_link_sizes: BTreeMap<String, u64>,
    /// New link groups; each entry is `[src, dst, dst, ...]` with
    /// consecutive same-source pairs coalesced.
    pub link_paths: Vec<Vec<String>>,
    #[serde(flatten)]
    pub stats: RunStats,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub run_time: String,
    pub options: Options,
}

impl Results {
    pub fn new(options: &Options) -> Self {
        let now = Utc::now();
        Self {
            existing_links: BTreeMap::new(),
            existing_link_sizes: BTreeMap::new(),
            link_paths: Vec::new(),
            stats: RunStats::default(),
            start_time: now,
            end_time: now,
            run_time: String::new(),
            options: options.clone(),
        }
    }

    pub fn start(&mut self) {
        self.start_time = Utc::now();
    }

    pub fn end(&mut self) {
        self.end_time = Utc::now();
        let elapsed = (self.end_time - self.start_time)
            .to_std()
            .unwrap_or_default();
        self.run_time = format_duration(elapsed);
    }

    pub fn found_directory(&mut self) {
        self.stats.dir_count += 1;
    }

    pub fn found_file(&mut self) {
        self.stats.file_count += 1;
    }

    pub fn found_file_too_small(&mut self) {
        self.stats.file_too_small_count += 1;
    }

    pub fn found_file_too_large(&mut self) {
        self.stats.file_too_large_count += 1;
    }

    pub fn found_inode(&mut self, nlink: u32) {
        self.stats.inode_count += 1;
        self.stats.nlink_count += u64::from(nlink);
    }

    pub fn missed_hash(&mut self) {
        self.stats.missed_hash_count += 1;
    }

    pub fn found_hash(&mut self) {
        self.stats.found_hash_count += 1;
    }

    pub fn searched_ino_seq(&mut self) {
        self.stats.ino_seq_search_count += 1;
    }

    pub fn inc_ino_seq_iterations(&mut self) {
        self.stats.ino_seq_iteration_count += 1;
    }

    pub fn no_hash_match(&mut self) {
        self.stats.hash_mismatch_count += 1;
    }

    pub fn did_comparison(&mut self) {
        self.stats.comparison_count += 1;
    }

    pub fn add_bytes_compared(&mut self, n: u64) {
        self.stats.bytes_compared += n;
    }

    pub fn found_equal_files(&mut self) {
        self.stats.equal_comparison_count += 1;
    }

    pub fn computed_digest(&mut self) {
        self.stats.digest_computed_count += 1;
    }

    pub fn compare_error(&mut self) {
        self.stats.compare_error_count += 1;
    }

    pub fn link_error(&mut self) {
        self.stats.link_error_count += 1;
    }

    pub fn quiescence_violation(&mut self) {
        self.stats.quiescence_violation_count += 1;
    }

    pub fn add_mismatched_mtime_bytes(&mut self, size: u64) {
        self.stats.mismatched_mtime_count += 1;
        self.stats.mismatched_mtime_bytes += size;
    }

    pub fn add_mismatched_mode_bytes(&mut self, size: u64) {
        self.stats.mismatched_mode_count += 1;
        self.stats.mismatched_mode_bytes += size;
    }

    pub fn add_mismatched_uid_bytes(&mut self, size: u64) {
        self.stats.mismatched_uid_count += 1;
        self.stats.mismatched_uid_bytes += size;
    }

    pub fn add_mismatched_gid_bytes(&mut self, size: u64) {
        self.stats.mismatched_gid_count += 1;
        self.stats.mismatched_gid_bytes += size;
    }

    pub fn add_mismatched_xattr_bytes(&mut self, size: u64) {
        self.stats.mismatched_xattr_count += 1;
        self.stats.mismatched_xattr_bytes += size;
    }

    pub fn add_mismatched_total_bytes(&mut self, size: u64) {
        self.stats.mismatched_total_count += 1;
        self.stats.mismatched_total_bytes += size;
    }

    /// Record a planned (or performed) link.  Consecutive pairs sharing a
    /// source are coalesced into one group.
    pub fn found_new_link(&mut self, src: &PathSplit, dst: &PathSplit) {
        self.stats.new_link_count += 1;
        if !self.options.store_new_link_results {
            return;
        }
        let src = src.join().display().to_string();
        let dst = dst.join().display().to_string();
        match self.link_paths.last_mut() {
            Some(group) if group[0] == src => group.push(dst),
            _ => self.link_paths.push(vec![src, dst]),
        }
    }

    pub fn found_removed_inode(&mut self, size: u64) {
        self.stats.inode_removed_count += 1;
        self.stats.inode_removed_byte_amount += size;
    }

    /// Record a pre-existing hardlink discovered during the walk.
    pub fn found_existing_link(&mut self, src: &PathSplit, dst: &PathSplit, size: u64) {
        self.stats.prev_link_count += 1;
        self.stats.prev_linked_byte_amount += size;
        if !self.options.store_existing_link_results {
            return;
        }
        let src = src.join().display().to_string();
        let dst = dst.join().display().to_string();
        let dests = self.existing_links.entry(src.clone()).or_default();
        if dests.is_empty() {
            self.existing_link_sizes.insert(src.clone(), size);
        }
        dests.push(dst);
        debug_assert_eq!(self.existing_link_sizes.get(&src), Some(&size));
    }

    /// Print the full human-readable report to stdout.
    pub fn output_results(&self) {
        if !self.existing_links.is_empty() {
            println!("{}\n", self.render_current_hardlinks());
        }
        if !self.link_paths.is_empty() {
            println!("{}\n", self.render_linked_paths());
        }
        if self.options.show_run_stats {
            println!("{}", self.render_run_stats());
        }
    }

    pub fn render_current_hardlinks(&self) -> String {
        let mut out = Vec::new();
        out.push("Currently hardlinked files".to_string());
        out.push("--------------------------".to_string());
        for (src, dsts) in &self.existing_links {
            out.push(format!("from: {}", src));
            for dst in dsts {
                out.push(format!("  to: {}", dst));
            }
            let size = self.existing_link_sizes.get(src).copied().unwrap_or(0);
            let saved = size.saturating_mul(dsts.len() as u64);
            out.push(format!(
                "Filesize: {}  Total saved: {}",
                humanize(size),
                humanize(saved)
            ));
        }
        out.join("\n")
    }

    pub fn render_linked_paths(&self) -> String {
        let mut out = Vec::new();
        if self.options.linking_enabled {
            out.push("Files that were hardlinked this run".to_string());
            out.push("-----------------------------------".to_string());
        } else {
            out.push("Files that are hardlinkable".to_string());
            out.push("---------------------------".to_string());
        }
        for group in &self.link_paths {
            for (i, path) in group.iter().enumerate() {
                if i == 0 {
                    out.push(format!("from: {}", path));
                } else {
                    out.push(format!("  to: {}", path));
                }
            }
        }
        out.join("\n")
    }

    pub fn render_run_stats(&self) -> String {
        let st = &self.stats;
        let mut rows: Vec<Vec<String>> = Vec::new();
        let mut row = |cols: Vec<String>| rows.push(cols);

        row(vec!["Hard linking statistics".into()]);
        row(vec!["-----------------------".into()]);
        row(vec!["Directories".into(), st.dir_count.to_string()]);
        row(vec!["Files".into(), st.file_count.to_string()]);
        if self.options.linking_enabled {
            row(vec!["Hardlinked this run".into(), st.new_link_count.to_string()]);
            row(vec!["Removed inodes".into(), st.inode_removed_count.to_string()]);
        } else {
            row(vec!["Hardlinkable this run".into(), st.new_link_count.to_string()]);
            row(vec!["Removable inodes".into(), st.inode_removed_count.to_string()]);
        }
        row(vec![
            "Currently linked bytes".into(),
            st.prev_linked_byte_amount.to_string(),
            humanize_parens(st.prev_linked_byte_amount),
        ]);
        let total_bytes = st.prev_linked_byte_amount + st.inode_removed_byte_amount;
        let (saved, total_saved) = if self.options.linking_enabled {
            ("Additional saved bytes", "Total saved bytes")
        } else {
            ("Additional saveable bytes", "Total saveable bytes")
        };
        row(vec![
            saved.into(),
            st.inode_removed_byte_amount.to_string(),
            humanize_parens(st.inode_removed_byte_amount),
        ]);
        row(vec![
            total_saved.into(),
            total_bytes.to_string(),
            humanize_parens(total_bytes),
        ]);
        row(vec!["Total run time".into(), self.run_time.clone()]);

        let total_links = st.prev_link_count + st.new_link_count;
        if self.options.show_extended_run_stats || self.options.debug_level > 0 {
            row(vec!["Comparisons".into(), st.comparison_count.to_string()]);
            row(vec!["Inodes".into(), st.inode_count.to_string()]);
            let unwalked_nlinks = st.nlink_count.saturating_sub(st.file_count);
            if unwalked_nlinks > 0 {
                row(vec![
                    "Inode total nlinks".into(),
                    st.nlink_count.to_string(),
                    format!("(Unwalked Nlinks: {})", unwalked_nlinks),
                ]);
            }
            row(vec!["Existing links".into(), st.prev_link_count.to_string()]);
            row(vec!["Total old + new links".into(), total_links.to_string()]);
            if st.file_too_large_count > 0 {
                row(vec!["Total too large files".into(), st.file_too_large_count.to_string()]);
            }
            if st.file_too_small_count > 0 {
                row(vec!["Total too small files".into(), st.file_too_small_count.to_string()]);
            }
            if st.mismatched_mtime_count > 0 {
                row(vec![
                    "Equal files w/ unequal time".into(),
                    st.mismatched_mtime_count.to_string(),
                    humanize_parens(st.mismatched_mtime_bytes),
                ]);
            }
            if st.mismatched_mode_count > 0 {
                row(vec![
                    "Equal files w/ unequal mode".into(),
                    st.mismatched_mode_count.to_string(),
                    humanize_parens(st.mismatched_mode_bytes),
                ]);
            }
            if st.mismatched_uid_count > 0 {
                row(vec![
                    "Equal files w/ unequal uid".into(),
                    st.mismatched_uid_count.to_string(),
                    humanize_parens(st.mismatched_uid_bytes),
                ]);
            }
            if st.mismatched_gid_count > 0 {
                row(vec![
                    "Equal files w/ unequal gid".into(),
                    st.mismatched_gid_count.to_string(),
                    humanize_parens(st.mismatched_gid_bytes),
                ]);
            }
            if st.mismatched_xattr_count > 0 {
                row(vec![
                    "Equal files w/ unequal xattr".into(),
                    st.mismatched_xattr_count.to_string(),
                    humanize_parens(st.mismatched_xattr_bytes),
                ]);
            }
            if st.mismatched_total_bytes > 0 {
                row(vec![
                    "Total equal file mismatches".into(),
                    st.mismatched_total_count.to_string(),
                    humanize_parens(st.mismatched_total_bytes),
                ]);
            }
            if st.bytes_compared > 0 {
                row(vec![
                    "Total bytes compared".into(),
                    st.bytes_compared.to_string(),
                    humanize_parens(st.bytes_compared),
                ]);
            }
            let remaining = st.inode_count.saturating_sub(st.inode_removed_count);
            row(vec!["Total remaining inodes".into(), remaining.to_string()]);
            if st.compare_error_count > 0 {
                row(vec!["Comparison read errors".into(), st.compare_error_count.to_string()]);
            }
            if st.link_error_count > 0 {
                row(vec!["Link errors".into(), st.link_error_count.to_string()]);
            }
            if st.quiescence_violation_count > 0 {
                row(vec![
                    "Skipped changed files".into(),
                    st.quiescence_violation_count.to_string(),
                ]);
            }
        }
        if self.options.debug_level > 0 {
            row(vec![
                "Total file hash hits".into(),
                st.found_hash_count.to_string(),
                format!(
                    "misses: {}  sum total: {}",
                    st.missed_hash_count,
                    st.found_hash_count + st.missed_hash_count
                ),
            ]);
            row(vec![
                "Total hash mismatches".into(),
                st.hash_mismatch_count.to_string(),
                format!("(+ total links: {})", st.hash_mismatch_count + total_links),
            ]);
            row(vec!["Total hash searches".into(), st.ino_seq_search_count.to_string()]);
            let avg = if st.ino_seq_iteration_count > 0 {
                format!(
                    "{:.1}",
                    st.ino_seq_iteration_count as f64 / st.ino_seq_search_count as f64
                )
            } else {
                "N/A".to_string()
            };
            row(vec![
                "Total hash list iterations".into(),
                st.ino_seq_iteration_count.to_string(),
                format!("(avg per search: {})", avg),
            ]);
            row(vec![
                "Total equal comparisons".into(),
                st.equal_comparison_count.to_string(),
            ]);
            row(vec![
                "Total digests computed".into(),
                st.digest_computed_count.to_string(),
            ]);
        }
        print_columns(&rows)
    }
}

/// Columnate rows of strings, separating the label column from the values
/// with " : ".
fn print_columns(rows: &[Vec<String>]) -> String {
    let num_cols = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut widths = vec![0usize; num_cols];
    for row in rows {
        for (i, s) in row.iter().enumerate() {
            widths[i] = widths[i].max(s.len());
        }
    }
    let mut out = String::new();
    for row in rows {
        let mut line = String::new();
        for (i, s) in row.iter().enumerate() {
            if i == 1 {
                line.push_str(" :");
            }
            if i >= 1 {
                line.push(' ');
            }
            if i >= 2 {
                line.push(' ');
            }
            line.push_str(&format!("{:<width$}", s, width = widths[i]));
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out.pop();
    out
}

/// Humanize a byte count into a 1024-based short form, trimming trailing
/// zeros from the fraction.
pub fn humanize(n: u64) -> String {
    let scaled = |div: f64| {
        let value = (n as f64 / div * 1000.0).round() / 1000.0;
        let s = format!("{:.3}", value);
        let s = s.trim_end_matches('0').trim_end_matches('.');
        s.to_string()
    };
    if n >= 1u64 << 50 {
        format!("{} PiB", scaled((1u64 << 50) as f64))
    } else if n >= 1u64 << 40 {
        format!("{} TiB", scaled((1u64 << 40) as f64))
    } else if n >= 1u64 << 30 {
        format!("{} GiB", scaled((1u64 << 30) as f64))
    } else if n >= 1u64 << 20 {
        format!("{} MiB", scaled((1u64 << 20) as f64))
    } else if n >= 1u64 << 10 {
        format!("{} KiB", scaled(1024.0))
    } else {
        format!("{} bytes", n)
    }
}

fn humanize_parens(n: u64) -> String {
    format!("({})", humanize(n))
}

fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else {
        let s = format!("{:.3}", d.as_secs_f64());
        format!("{}s", s.trim_end_matches('0').trim_end_matches('.'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ps(dir: &str, name: &str) -> PathSplit {
        PathSplit {
            dirname: Arc::from(dir),
            filename: Arc::from(name),
        }
    }

    #[test]
    fn humanize_thresholds() {
        assert_eq!(humanize(0), "0 bytes");
        assert_eq!(humanize(1023), "1023 bytes");
        assert_eq!(humanize(1024), "1 KiB");
        assert_eq!(humanize(1536), "1.5 KiB");
        assert_eq!(humanize(1 << 20), "1 MiB");
        assert_eq!(humanize((1 << 30) + (1 << 29)), "1.5 GiB");
        assert_eq!(humanize(1 << 40), "1 TiB");
        assert_eq!(humanize(1 << 50), "1 PiB");
    }

    #[test]
    fn new_link_groups_coalesce_on_shared_source() {
        let mut r = Results::new(&Options::default());
        r.found_new_link(&ps("/d", "a"), &ps("/d", "b"));
        r.found_new_link(&ps("/d", "a"), &ps("/d", "c"));
        r.found_new_link(&ps("/e", "x"), &ps("/e", "y"));
        assert_eq!(
            r.link_paths,
            vec![
                vec!["/d/a".to_string(), "/d/b".into(), "/d/c".into()],
                vec!["/e/x".to_string(), "/e/y".into()],
            ]
        );
        assert_eq!(r.stats.new_link_count, 3);
    }

    #[test]
    fn new_link_counting_without_storing() {
        let opts = Options {
            store_new_link_results: false,
            ..Options::default()
        };
        let mut r = Results::new(&opts);
        r.found_new_link(&ps("/d", "a"), &ps("/d", "b"));
        assert!(r.link_paths.is_empty());
        assert_eq!(r.stats.new_link_count, 1);
    }

    #[test]
    fn existing_link_groups_accumulate_per_source() {
        let mut r = Results::new(&Options::default());
        r.found_existing_link(&ps("/d", "a"), &ps("/d", "b"), 42);
        r.found_existing_link(&ps("/d", "a"), &ps("/d", "c"), 42);
        assert_eq!(r.stats.prev_link_count, 2);
        assert_eq!(r.stats.prev_linked_byte_amount, 84);
        assert_eq!(r.existing_links["/d/a"], vec!["/d/b", "/d/c"]);
        assert_eq!(r.existing_link_sizes["/d/a"], 42);
    }

    #[test]
    fn stats_table_aligns_columns() {
        let mut r = Results::new(&Options::default());
        r.stats.dir_count = 3;
        r.stats.file_count = 14;
        r.end();
        let table = r.render_run_stats();
        assert!(table.contains("Directories"));
        let dir_line = table.lines().find(|l| l.contains("Directories")).unwrap();
        let file_line = table.lines().find(|l| l.contains("Files")).unwrap();
        assert_eq!(
            dir_line.find(" : ").unwrap(),
            file_line.find(" : ").unwrap()
        );
    }

    #[test]
    fn json_keys_are_camel_case() {
        let mut r = Results::new(&Options::default());
        r.end();
        let json = serde_json::to_value(&r).unwrap();
        assert!(json.get("newLinkCount").is_some());
        assert!(json.get("inodeRemovedByteAmount").is_some());
        assert!(json.get("existingLinks").is_some());
        assert!(json.get("startTime").is_some());
        assert!(json.get("runTime").is_some());
        assert!(json.get("options").is_some());
        assert!(json["options"].get("minFileSize").is_some());
    }
}
