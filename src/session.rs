use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cancel::CancellationFlag;
use crate::config::AppConfig;
use crate::engine::GeocodeEngine;
use crate::errors::{AppError, AppResult};
use crate::normalize::is_valid_zip;
use crate::providers::ProviderChain;
use crate::stats::{SessionState, StatsHandle, StatusSnapshot};

/// Header names playing each role in the input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRoles {
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

#[derive(Debug, Clone, Copy)]
struct ColumnIndexes {
    address: usize,
    city: usize,
    state: usize,
    zip: usize,
}

impl ColumnRoles {
    fn locate(&self, headers: &StringRecord) -> AppResult<ColumnIndexes> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|header| header.trim() == name.trim())
                .ok_or_else(|| AppError::MissingColumn(name.to_string()))
        };
        Ok(ColumnIndexes {
            address: find(&self.address)?,
            city: find(&self.city)?,
            state: find(&self.state)?,
            zip: find(&self.zip)?,
        })
    }
}

/// One batch run over one input file, with its own engine, cache, stats and
/// cancellation flag.
pub struct BatchSession {
    id: String,
    stats: StatsHandle,
    cancel: CancellationFlag,
    engine: AsyncMutex<GeocodeEngine>,
}

impl BatchSession {
    pub fn new(id: impl Into<String>, chain: ProviderChain, log_capacity: usize) -> Self {
        Self::with_cancellation(id, chain, log_capacity, CancellationFlag::new())
    }

    /// Builds a session observing an externally owned cancellation flag.
    pub fn with_cancellation(
        id: impl Into<String>,
        chain: ProviderChain,
        log_capacity: usize,
        cancel: CancellationFlag,
    ) -> Self {
        let stats = StatsHandle::new(log_capacity);
        let engine = GeocodeEngine::new(chain, stats.clone(), cancel.clone());
        Self {
            id: id.into(),
            stats,
            cancel,
            engine: AsyncMutex::new(engine),
        }
    }

    pub fn from_config(id: impl Into<String>, config: &AppConfig) -> AppResult<Self> {
        let chain = ProviderChain::from_config(config)?;
        Ok(Self::new(id, chain, config.results_log_capacity))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!(session = %self.id, "cancellation requested");
        }
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn state(&self) -> SessionState {
        self.stats.state()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.stats.snapshot()
    }

    /// Starts processing on the runtime and returns at once; poll
    /// [`BatchSession::snapshot`] for progress.
    pub fn spawn<R, W>(
        self: &Arc<Self>,
        input: R,
        output: W,
        roles: ColumnRoles,
    ) -> JoinHandle<SessionState>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let session = Arc::clone(self);
        tokio::spawn(async move { session.process(input, output, &roles).await })
    }

    /// File-backed variant of [`BatchSession::spawn`].
    ///
    /// File reads and writes are blocking std I/O on the runtime worker.
    /// Inputs are expected to be CSV-sized.
    pub fn spawn_file(
        self: &Arc<Self>,
        input: PathBuf,
        output: PathBuf,
        roles: ColumnRoles,
    ) -> JoinHandle<SessionState> {
        let session = Arc::clone(self);
        tokio::spawn(async move { session.process_file(&input, &output, &roles).await })
    }

    /// Opens `input` and truncates `output` only once this call owns the
    /// session; a session that is running or already ran leaves both alone.
    pub async fn process_file(
        &self,
        input: &Path,
        output: &Path,
        roles: &ColumnRoles,
    ) -> SessionState {
        let Some(mut engine) = self.claim() else {
            return self.stats.state();
        };

        let files = File::open(input).and_then(|reader| Ok((reader, File::create(output)?)));
        match files {
            Ok((reader, writer)) => {
                self.drive(
                    &mut engine,
                    BufReader::new(reader),
                    BufWriter::new(writer),
                    roles,
                )
                .await
            }
            Err(err) => self.fail(AppError::from(err)),
        }
    }

    /// Rewrites `input` into `output`, filling missing postal codes.
    ///
    /// Never returns an error: fatal problems are logged into the session and
    /// reported as [`SessionState::Failed`].
    pub async fn process<R, W>(&self, input: R, output: W, roles: &ColumnRoles) -> SessionState
    where
        R: Read,
        W: Write,
    {
        let Some(mut engine) = self.claim() else {
            return self.stats.state();
        };
        self.drive(&mut engine, input, output, roles).await
    }

    /// Moves CREATED to RUNNING and hands back the engine, or `None` when the
    /// session is busy or finished.
    fn claim(&self) -> Option<MutexGuard<'_, GeocodeEngine>> {
        let Ok(engine) = self.engine.try_lock() else {
            warn!(session = %self.id, "session is already processing");
            return None;
        };
        if self.stats.state() != SessionState::Created {
            warn!(session = %self.id, state = self.stats.state().as_str(), "session already ran");
            return None;
        }

        self.stats.set_state(SessionState::Running);
        info!(session = %self.id, "processing started");
        Some(engine)
    }

    async fn drive<R, W>(
        &self,
        engine: &mut GeocodeEngine,
        input: R,
        output: W,
        roles: &ColumnRoles,
    ) -> SessionState
    where
        R: Read,
        W: Write,
    {
        let state = match self.run(engine, input, output, roles).await {
            Ok(state) => state,
            Err(err) => return self.fail(err),
        };

        if state == SessionState::Completed {
            self.stats.mark_progress_complete();
        }
        self.stats.set_state(state);
        let snapshot = self.stats.snapshot();
        info!(
            session = %self.id,
            state = state.as_str(),
            processed = snapshot.total_processed,
            resolved = snapshot.successful_geocodes,
            failed = snapshot.failed_geocodes,
            "processing finished"
        );
        state
    }

    async fn run<R, W>(
        &self,
        engine: &mut GeocodeEngine,
        input: R,
        output: W,
        roles: &ColumnRoles,
    ) -> AppResult<SessionState>
    where
        R: Read,
        W: Write,
    {
        let mut reader = ReaderBuilder::new().flexible(true).from_reader(input);
        let headers = reader.headers()?.clone();
        let columns = roles.locate(&headers)?;
        let records = reader.records().collect::<Result<Vec<_>, _>>()?;
        let total_rows = records.len();

        let mut writer = WriterBuilder::new().flexible(true).from_writer(output);
        writer.write_record(&headers)?;

        for record in records {
            if self.cancel.is_cancelled() {
                writer.flush()?;
                return Ok(SessionState::Cancelled);
            }
            let record = self.rewrite_record(engine, record, columns).await;
            writer.write_record(&record)?;
            self.stats.record_row_processed(total_rows);
        }
        writer.flush()?;

        if self.cancel.is_cancelled() {
            Ok(SessionState::Cancelled)
        } else {
            Ok(SessionState::Completed)
        }
    }

    async fn rewrite_record(
        &self,
        engine: &mut GeocodeEngine,
        record: StringRecord,
        columns: ColumnIndexes,
    ) -> StringRecord {
        let field = |idx: usize| record.get(idx).unwrap_or_default().trim().to_string();
        let address = field(columns.address);
        let city = field(columns.city);
        let state = field(columns.state);

        if address.is_empty() || city.is_empty() || state.is_empty() {
            return record;
        }
        if is_valid_zip(&field(columns.zip)) {
            return record;
        }

        match engine.resolve(&address, &city, &state).await {
            Some(zip) => with_field(&record, columns.zip, zip.as_str()),
            None => record,
        }
    }

    fn fail(&self, err: AppError) -> SessionState {
        warn!(?err, session = %self.id, "processing failed");
        self.stats.record_error(format!("Processing error: {err}"));
        self.stats.set_state(SessionState::Failed);
        SessionState::Failed
    }
}

fn with_field(record: &StringRecord, idx: usize, value: &str) -> StringRecord {
    let mut fields: Vec<&str> = record.iter().collect();
    if fields.len() <= idx {
        fields.resize(idx + 1, "");
    }
    fields[idx] = value;
    StringRecord::from(fields)
}
