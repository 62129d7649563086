//! Binary persistence for `FrequencyModel`.
//!
//! Layout (bincode, fixed-width little-endian integers):
//! `u32 version`, the five model parameters, the three raw totals, the
//! vocabulary size, then one length-prefixed entry list per order.
//!
//! Saves go to a temp file in the target directory which is renamed over the
//! destination; the previous file is first copied to `<name>.bak`. Loads
//! decode and validate everything before touching in-memory state.
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::PoisonError;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::error::ModelError;
use crate::ngram::{FrequencyEntry, FrequencyModel, ModelParams, NGram, NGramType};
use crate::worker::TaskHandle;

pub(crate) const VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Totals {
    unigrams: u64,
    bigrams: u64,
    trigrams: u64,
    vocabulary_size: u32,
}

#[derive(Serialize, Deserialize)]
struct EntryRecord {
    key: String,
    raw_count: u64,
    last_used: u64,
    decayed_frequency: f64,
    words: Vec<String>,
    arity: u32,
}

#[derive(Serialize, Deserialize)]
struct ModelImage {
    params: ModelParams,
    totals: Totals,
    unigrams: Vec<EntryRecord>,
    bigrams: Vec<EntryRecord>,
    trigrams: Vec<EntryRecord>,
}

impl EntryRecord {
    fn from_entry(key: String, e: FrequencyEntry) -> Self {
        Self {
            key,
            raw_count: e.raw_count,
            last_used: e.last_used,
            decayed_frequency: e.decayed_frequency,
            arity: e.ngram.kind().tag(),
            words: e.ngram.words().to_vec(),
        }
    }

    fn into_entry(self, expected: NGramType) -> Result<(String, FrequencyEntry), ModelError> {
        let kind = NGramType::from_tag(self.arity)
            .ok_or_else(|| ModelError::Corrupt(format!("unknown arity tag {}", self.arity)))?;
        if kind != expected {
            return Err(ModelError::Corrupt(format!(
                "{kind:?} entry in {expected:?} table"
            )));
        }
        let ngram = NGram::from_normalized(self.words)
            .filter(|g| g.kind() == kind)
            .ok_or_else(|| ModelError::Corrupt(format!("bad token count for key {:?}", self.key)))?;
        if ngram.key() != self.key {
            return Err(ModelError::Corrupt(format!("key mismatch for {ngram}")));
        }
        if !self.decayed_frequency.is_finite() || self.decayed_frequency < 0.0 {
            return Err(ModelError::Corrupt(format!("bad frequency for {ngram}")));
        }
        Ok((
            self.key,
            FrequencyEntry {
                ngram,
                raw_count: self.raw_count,
                last_used: self.last_used,
                decayed_frequency: self.decayed_frequency,
            },
        ))
    }
}

fn decode_table(
    records: Vec<EntryRecord>,
    kind: NGramType,
) -> Result<Vec<(String, FrequencyEntry)>, ModelError> {
    records.into_iter().map(|r| r.into_entry(kind)).collect()
}

/// `model.dat` -> `model.dat.bak`
pub(crate) fn backup_path(path: &Path) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("model"));
    name.push(".bak");
    path.with_file_name(name)
}

impl FrequencyModel {
    fn to_image(&self) -> ModelImage {
        let _shared = self
            .state
            .structure
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let table = |kind: NGramType| -> Vec<EntryRecord> {
            let map = match kind {
                NGramType::Unigram => &self.state.unigrams,
                NGramType::Bigram => &self.state.bigrams,
                NGramType::Trigram => &self.state.trigrams,
            };
            map.snapshot()
                .into_iter()
                .map(|(k, e)| EntryRecord::from_entry(k, e))
                .collect()
        };
        let unigrams = table(NGramType::Unigram);
        ModelImage {
            params: self.params(),
            totals: Totals {
                unigrams: self.state.totals[0].load(Ordering::Relaxed),
                bigrams: self.state.totals[1].load(Ordering::Relaxed),
                trigrams: self.state.totals[2].load(Ordering::Relaxed),
                vocabulary_size: u32::try_from(unigrams.len()).unwrap_or(u32::MAX),
            },
            unigrams,
            bigrams: table(NGramType::Bigram),
            trigrams: table(NGramType::Trigram),
        }
    }

    /// Serialize the whole model.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ModelError> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    fn write_to<W: Write>(&self, mut w: W) -> Result<(), ModelError> {
        let image = self.to_image();
        bincode::serialize_into(&mut w, &VERSION)?;
        bincode::serialize_into(&mut w, &image)?;
        w.flush()?;
        Ok(())
    }

    /// Replace the model contents from serialized bytes. On error the model
    /// is left untouched.
    pub fn load_bytes(&self, bytes: &[u8]) -> Result<(), ModelError> {
        self.read_from(bytes)
    }

    fn read_from<R: Read>(&self, mut r: R) -> Result<(), ModelError> {
        let version: u32 = bincode::deserialize_from(&mut r)?;
        if version != VERSION {
            return Err(ModelError::UnsupportedVersion(version));
        }
        let image: ModelImage = bincode::deserialize_from(&mut r)?;

        let unigrams = decode_table(image.unigrams, NGramType::Unigram)?;
        let bigrams = decode_table(image.bigrams, NGramType::Bigram)?;
        let trigrams = decode_table(image.trigrams, NGramType::Trigram)?;
        if unigrams.len() != image.totals.vocabulary_size as usize {
            warn!(
                stored = image.totals.vocabulary_size,
                actual = unigrams.len(),
                "vocabulary size mismatch in saved model, using actual"
            );
        }

        let _exclusive = self
            .state
            .structure
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.replace_params(image.params);
        self.state.unigrams.replace_all(unigrams);
        self.state.bigrams.replace_all(bigrams);
        self.state.trigrams.replace_all(trigrams);
        self.recompute_totals();
        Ok(())
    }

    /// Save to the configured path.
    pub fn save(&self) -> Result<(), ModelError> {
        let path = self.path().ok_or(ModelError::NoPath)?;
        self.save_to(&path)
    }

    /// Atomically write the model to `path`, keeping the previous file as a
    /// `.bak` sibling.
    pub fn save_to(&self, path: &Path) -> Result<(), ModelError> {
        let result = self.save_inner(path);
        match &result {
            Ok(()) => info!(path = %path.display(), vocabulary = self.vocabulary_size(), "frequency model saved"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to save frequency model"),
        }
        if let Some(listener) = self.listener() {
            listener.on_model_saved(result.is_ok());
        }
        result
    }

    fn save_inner(&self, path: &Path) -> Result<(), ModelError> {
        let _io = self
            .state
            .io_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        if path.exists() {
            fs::copy(path, backup_path(path))?;
        }

        let mut tmp = NamedTempFile::new_in(&dir)?;
        self.write_to(BufWriter::new(tmp.as_file_mut()))?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| ModelError::Io(e.error))?;
        Ok(())
    }

    /// Load from the configured path.
    pub fn load(&self) -> Result<(), ModelError> {
        let path = self.path().ok_or(ModelError::NoPath)?;
        self.load_from(&path)
    }

    /// Replace the model contents with the file at `path`.
    ///
    /// A missing file is not an error: the model is left as it is (a cold
    /// start). Any other failure leaves in-memory state unchanged.
    pub fn load_from(&self, path: &Path) -> Result<(), ModelError> {
        let result = self.load_inner(path);
        match &result {
            Ok(true) => info!(path = %path.display(), vocabulary = self.vocabulary_size(), "frequency model loaded"),
            Ok(false) => info!(path = %path.display(), "no saved frequency model, starting empty"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to load frequency model"),
        }
        if let Some(listener) = self.listener() {
            listener.on_model_loaded(result.is_ok());
        }
        result.map(|_| ())
    }

    fn load_inner(&self, path: &Path) -> Result<bool, ModelError> {
        let _io = self
            .state
            .io_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        self.read_from(BufReader::new(file))?;
        Ok(true)
    }

    /// `save()` on the worker pool.
    pub fn spawn_save(&self) -> TaskHandle<Result<(), ModelError>> {
        let this = self.clone();
        self.tasks.spawn(move || this.save())
    }

    /// `load()` on the worker pool.
    pub fn spawn_load(&self) -> TaskHandle<Result<(), ModelError>> {
        let this = self.clone();
        self.tasks.spawn(move || this.load())
    }
}
