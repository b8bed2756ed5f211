use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::tensor::backend::Backend;
use tumor_core::Result;

use super::{CallbackAction, EpochContext, EpochLogs, TrainingCallback};

/// Appends one row per epoch to a CSV file.
///
/// The header (`epoch` then the sorted metric names of the first epoch) is
/// written only when the file is new or empty, so resumed runs keep adding
/// rows under the original header.
pub struct CsvLogger {
    path: PathBuf,
    keys: Option<Vec<String>>,
    append_header: bool,
    writer: Option<BufWriter<File>>,
}

impl CsvLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            keys: None,
            append_header: true,
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the file for appending
    pub fn open(&mut self) -> Result<()> {
        let has_content = fs::metadata(&self.path).map(|m| m.len() > 0).unwrap_or(false);
        self.append_header = !has_content;
        self.keys = None;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    pub fn write_epoch(&mut self, epoch: usize, logs: &EpochLogs) -> Result<()> {
        if self.writer.is_none() {
            self.open()?;
        }

        let keys = self
            .keys
            .get_or_insert_with(|| logs.keys().map(str::to_string).collect());

        let mut lines = String::new();
        if self.append_header {
            lines.push_str("epoch");
            for key in keys.iter() {
                lines.push(',');
                lines.push_str(key);
            }
            lines.push('\n');
            self.append_header = false;
        }

        lines.push_str(&epoch.to_string());
        for key in keys.iter() {
            lines.push(',');
            match logs.get(key) {
                Some(value) => lines.push_str(&value.to_string()),
                None => lines.push_str("NA"),
            }
        }
        lines.push('\n');

        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(lines.as_bytes())?;
            writer.flush()?;
        }
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl<B: Backend, M: Module<B>> TrainingCallback<B, M> for CsvLogger {
    fn on_train_begin(&mut self) -> Result<()> {
        self.open()
    }

    fn on_epoch_end(&mut self, ctx: &mut EpochContext<'_, M>) -> Result<CallbackAction> {
        self.write_epoch(ctx.epoch, ctx.logs)?;
        Ok(CallbackAction::Continue)
    }

    fn on_train_end(&mut self) -> Result<()> {
        self.close()
    }

    fn name(&self) -> &str {
        "CSVLogger"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::{ACC, LOSS, LR, VAL_ACC, VAL_LOSS};
    use tempfile::TempDir;

    fn logs(acc: f64) -> EpochLogs {
        EpochLogs::from([(LOSS, 0.5), (ACC, acc), (VAL_LOSS, 0.6), (VAL_ACC, 0.7), (LR, 0.001)])
    }

    fn run(logger: &mut CsvLogger, epochs: usize) -> Result<()> {
        logger.open()?;
        for epoch in 0..epochs {
            logger.write_epoch(epoch, &logs(0.5 + epoch as f64 / 10.0))?;
        }
        logger.close()
    }

    #[test]
    fn test_header_and_rows() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("result.csv");
        run(&mut CsvLogger::new(&path), 2)?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "epoch,acc,loss,lr,val_acc,val_loss");
        assert_eq!(lines[1], "0,0.5,0.5,0.001,0.7,0.6");
        assert_eq!(lines[2], "1,0.6,0.5,0.001,0.7,0.6");
        Ok(())
    }

    #[test]
    fn test_resumed_run_appends_without_second_header() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("result.csv");
        run(&mut CsvLogger::new(&path), 3)?;
        run(&mut CsvLogger::new(&path), 2)?;

        let content = fs::read_to_string(&path)?;
        let headers = content.lines().filter(|l| l.starts_with("epoch")).count();
        assert_eq!(headers, 1);
        assert_eq!(content.lines().count(), 1 + 3 + 2);
        Ok(())
    }

    #[test]
    fn test_empty_file_gets_header() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("result.csv");
        fs::write(&path, "")?;
        run(&mut CsvLogger::new(&path), 1)?;
        assert!(fs::read_to_string(&path)?.starts_with("epoch,"));
        Ok(())
    }

    #[test]
    fn test_missing_value_written_as_na() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("result.csv");
        let mut logger = CsvLogger::new(&path);
        logger.open()?;
        logger.write_epoch(0, &EpochLogs::from([(ACC, 0.5), (LOSS, 0.3)]))?;
        logger.write_epoch(1, &EpochLogs::from([(ACC, 0.6)]))?;
        logger.close()?;

        let content = fs::read_to_string(&path)?;
        assert_eq!(content.lines().nth(2), Some("1,0.6,NA"));
        Ok(())
    }
}
