//! Per-epoch metric sinks.
//!
//! Two outputs are produced for every finished epoch:
//!
//! - the **epoch log**, a plain text file with a 5-line header followed by
//!   one 3-line block (plus a blank separator) per epoch. Lines are
//!   prefixed with `[` and a tab, and external plotting tools locate the
//!   numbers by whitespace token position, so the layout is frozen under
//!   the schema tag [`LOG_SCHEMA`];
//! - the **scalar store**, a JSON-lines file with one `{tag, step, value}`
//!   event per scalar, read back grouped by tag.
//!
//! [`EpochRecord`] is the single place both the writer and the parser go
//! through.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::error::{Error, Result};
use crate::utils::metrics::round_to;

/// Schema tag written on the first header line
pub const LOG_SCHEMA: &str = "epoch-log/1";

/// Number of header lines preceding the first epoch block
pub const HEADER_LINES: usize = 5;

/// Prefix of every line in the epoch log
const LINE_PREFIX: &str = "[\t";

/// Whitespace token positions of the percentages on the metrics line
const ACCURACY_TOKEN: usize = 2;
const PRECISION_TOKEN: usize = 7;
const RECALL_TOKEN: usize = 12;

/// Scalar tags mirrored into the summary store
pub const SCALAR_TAGS: [&str; 5] = ["train_loss", "val_loss", "percision", "recall", "accuracy"];

/// One epoch's results, already rounded to 3 decimals.
///
/// `accuracy`, `precision` and `recall` are fractions in `[0, 1]`; the log
/// shows them as percentages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: f64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
}

impl EpochRecord {
    /// Build a record, rounding every value to 3 decimals
    pub fn new(
        epoch: usize,
        train_loss: f64,
        val_loss: f64,
        accuracy: f64,
        precision: f64,
        recall: f64,
    ) -> Self {
        Self {
            epoch,
            train_loss: round_to(train_loss, 3),
            val_loss: round_to(val_loss, 3),
            accuracy: round_to(accuracy, 3),
            precision: round_to(precision, 3),
            recall: round_to(recall, 3),
        }
    }

    /// The three log lines of this epoch, in order, without newlines
    pub fn to_lines(&self) -> [String; 3] {
        [
            format!(
                "{LINE_PREFIX}training epoch={} .. train_loss={:.3}",
                self.epoch, self.train_loss
            ),
            format!(
                "{LINE_PREFIX}validation epoch={} .. val_loss={:.3}",
                self.epoch, self.val_loss
            ),
            format!(
                "{LINE_PREFIX}Accuracy = {:.1} % .. Percision = {:.1} % .. Recall = {:.1} % ",
                self.accuracy * 100.0,
                self.precision * 100.0,
                self.recall * 100.0
            ),
        ]
    }

    /// Parse the three lines of one epoch block.
    ///
    /// `first_line` is the 1-based line number of `lines[0]`, used in errors.
    pub fn parse(lines: [&str; 3], first_line: usize) -> Result<Self> {
        let (epoch, train_loss) = parse_loss_line(lines[0], "training", "train_loss", first_line)?;
        let (val_epoch, val_loss) =
            parse_loss_line(lines[1], "validation", "val_loss", first_line + 1)?;

        if val_epoch != epoch {
            return Err(Error::LogFormat {
                line: first_line + 1,
                message: format!("validation epoch {} follows training epoch {}", val_epoch, epoch),
            });
        }

        let line = first_line + 2;
        let tokens: Vec<&str> = lines[2].split(' ').collect();
        let pct = |idx: usize| -> Result<f64> {
            let token = tokens.get(idx).ok_or_else(|| Error::LogFormat {
                line,
                message: format!("metrics line has no token {}", idx),
            })?;
            let value: f64 = token.parse().map_err(|_| Error::LogFormat {
                line,
                message: format!("'{}' is not a number", token),
            })?;
            Ok(round_to(value / 100.0, 3))
        };

        let accuracy_label = format!("{LINE_PREFIX}Accuracy");
        let labels = [
            (0, accuracy_label.as_str()),
            (1, "="),
            (3, "%"),
            (5, "Percision"),
            (6, "="),
            (8, "%"),
            (10, "Recall"),
            (11, "="),
            (13, "%"),
        ];
        for (idx, expected) in labels {
            if tokens.get(idx) != Some(&expected) {
                return Err(Error::LogFormat {
                    line,
                    message: format!(
                        "expected '{}' at token {} of the metrics line, found {:?}",
                        expected.trim_start_matches(LINE_PREFIX),
                        idx,
                        tokens.get(idx)
                    ),
                });
            }
        }

        Ok(Self {
            epoch,
            train_loss,
            val_loss,
            accuracy: pct(ACCURACY_TOKEN)?,
            precision: pct(PRECISION_TOKEN)?,
            recall: pct(RECALL_TOKEN)?,
        })
    }

    /// `(tag, value)` pairs mirrored into the scalar store
    pub fn scalars(&self) -> [(&'static str, f64); 5] {
        [
            (SCALAR_TAGS[0], self.train_loss),
            (SCALAR_TAGS[1], self.val_loss),
            (SCALAR_TAGS[2], self.precision),
            (SCALAR_TAGS[3], self.recall),
            (SCALAR_TAGS[4], self.accuracy),
        ]
    }
}

fn parse_loss_line(line: &str, phase: &str, key: &str, line_no: usize) -> Result<(usize, f64)> {
    let format_err = |message: String| Error::LogFormat {
        line: line_no,
        message,
    };

    let body = line
        .strip_prefix(LINE_PREFIX)
        .and_then(|l| l.strip_prefix(phase))
        .and_then(|l| l.strip_prefix(" epoch="))
        .ok_or_else(|| format_err(format!("expected a '{}' line, got '{}'", phase, line)))?;

    let (epoch, loss) = body
        .split_once(&format!(" .. {}=", key))
        .ok_or_else(|| format_err(format!("missing '{}='", key)))?;

    let epoch = epoch
        .trim()
        .parse()
        .map_err(|_| format_err(format!("bad epoch '{}'", epoch)))?;
    let loss = loss
        .trim()
        .parse()
        .map_err(|_| format_err(format!("bad {} '{}'", key, loss)))?;

    Ok((epoch, loss))
}

/// Run description written into the log header
#[derive(Debug, Clone)]
pub struct LogHeader {
    /// Run identifier, usually the hyperparameter tag
    pub run: String,
    /// Task name (`emotion` or `age`)
    pub task: String,
    pub num_classes: usize,
    pub start_epoch: usize,
    pub started_at: DateTime<Utc>,
}

impl LogHeader {
    fn to_lines(&self) -> [String; HEADER_LINES] {
        [
            format!("{LINE_PREFIX}{LOG_SCHEMA}"),
            format!("{LINE_PREFIX}run={}", self.run),
            format!("{LINE_PREFIX}task={} classes={}", self.task, self.num_classes),
            format!(
                "{LINE_PREFIX}started={} start_epoch={}",
                self.started_at.to_rfc3339(),
                self.start_epoch
            ),
            format!("{LINE_PREFIX}fields: train_loss val_loss accuracy% precision% recall%"),
        ]
    }
}

/// Writer for the epoch log. Truncates any previous file on creation.
pub struct EpochLogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl EpochLogWriter {
    pub fn create(path: impl AsRef<Path>, header: &LogHeader) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut writer = BufWriter::new(File::create(&path)?);
        for line in header.to_lines() {
            writeln!(writer, "{}", line)?;
        }
        writer.flush()?;

        debug!("Epoch log opened at {:?}", path);
        Ok(Self { path, writer })
    }

    /// Append one epoch block and flush it to disk
    pub fn append(&mut self, record: &EpochRecord) -> Result<()> {
        for line in record.to_lines() {
            writeln!(self.writer, "{}", line)?;
        }
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read every epoch block of a log written by [`EpochLogWriter`]
pub fn read_epoch_log(path: impl AsRef<Path>) -> Result<Vec<EpochRecord>> {
    let file = File::open(path.as_ref())?;
    let lines: Vec<String> = BufReader::new(file).lines().collect::<std::io::Result<_>>()?;

    if lines.len() < HEADER_LINES {
        return Err(Error::LogFormat {
            line: lines.len(),
            message: format!("expected {} header lines", HEADER_LINES),
        });
    }

    let schema = lines[0].strip_prefix(LINE_PREFIX).unwrap_or(lines[0].as_str());
    if schema != LOG_SCHEMA {
        return Err(Error::LogFormat {
            line: 1,
            message: format!("unsupported schema '{}', expected '{}'", schema, LOG_SCHEMA),
        });
    }

    // (1-based line number, text) of every non-empty data line
    let data: Vec<(usize, &str)> = lines
        .iter()
        .enumerate()
        .skip(HEADER_LINES)
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| (i + 1, l.as_str()))
        .collect();

    if data.len() % 3 != 0 {
        return Err(Error::LogFormat {
            line: data.last().map(|(n, _)| *n).unwrap_or(HEADER_LINES),
            message: "truncated epoch block".to_string(),
        });
    }

    data.chunks(3)
        .map(|block| EpochRecord::parse([block[0].1, block[1].1, block[2].1], block[0].0))
        .collect()
}

/// One scalar event in the summary store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarEvent {
    pub tag: String,
    pub step: usize,
    pub value: f64,
    pub wall_time: DateTime<Utc>,
}

/// Append-only JSON-lines time series keyed by tag and step
pub struct ScalarStore {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl ScalarStore {
    /// File name used inside the summary directory
    pub const FILE_NAME: &'static str = "scalars.jsonl";

    /// Open (or create) the store inside `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(Self::FILE_NAME);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        let event = ScalarEvent {
            tag: tag.to_string(),
            step,
            value,
            wall_time: Utc::now(),
        };
        serde_json::to_writer(&mut self.writer, &event)?;
        writeln!(self.writer)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a store back as `tag -> [(step, value)]`, in file order
    pub fn read(path: impl AsRef<Path>) -> Result<BTreeMap<String, Vec<(usize, f64)>>> {
        let file = File::open(path.as_ref())?;
        let mut series: BTreeMap<String, Vec<(usize, f64)>> = BTreeMap::new();

        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: ScalarEvent = serde_json::from_str(&line)?;
            series.entry(event.tag).or_default().push((event.step, event.value));
        }

        Ok(series)
    }
}

/// Epoch log plus scalar store, written together once per epoch
pub struct MetricsSink {
    log: EpochLogWriter,
    scalars: ScalarStore,
}

impl MetricsSink {
    pub fn new(log: EpochLogWriter, scalars: ScalarStore) -> Self {
        Self { log, scalars }
    }

    pub fn record(&mut self, record: &EpochRecord) -> Result<()> {
        self.log.append(record)?;
        for (tag, value) in record.scalars() {
            self.scalars.add_scalar(tag, value, record.epoch)?;
        }
        self.scalars.flush()
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    pub fn scalars_path(&self) -> &Path {
        self.scalars.path()
    }
}
