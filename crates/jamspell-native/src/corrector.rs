// SpellCorrector: owns one native corrector and exposes the engine's
// operations with Rust types.
//
// The native handle is registered with a `Reclaimer`; dropping the
// corrector schedules `jamspell_corrector_delete` on the reclaimer thread.
// Every other engine call happens through `&self`, so the handle is live for
// each of them: the guard is only released once the corrector is gone.
//
// The engine only accepts penalties and the candidate limit (it cannot
// report them back), so the last values set are mirrored here. Defaults
// must match the engine's own.

use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use jamspell_core::{JamSpellError, NativeHandle, Result};
use tempfile::TempPath;

use crate::engine::{self, NativeEngine};
use crate::reclaimer::{Reclaimer, Tracked};

/// Engine default for both word penalties.
pub const DEFAULT_PENALTY: f64 = 20.0;

/// Engine default for the number of candidates checked per word.
pub const DEFAULT_MAX_CANDIDATES_TO_CHECK: usize = 14;

/// Detects and fixes spelling mistakes with the native engine.
pub struct SpellCorrector {
    engine: Arc<dyn NativeEngine>,
    corrector: Tracked,
    known_words_penalty: f64,
    unknown_words_penalty: f64,
    max_candidates_to_check: usize,
}

impl SpellCorrector {
    /// Create a corrector on the process-wide engine, bootstrapping the
    /// native module on first use.
    pub fn new() -> Result<Self> {
        Self::with_engine(engine::shared()?, Reclaimer::global())
    }

    /// Create a corrector on `engine`, releasing it through `reclaimer`.
    pub fn with_engine(engine: Arc<dyn NativeEngine>, reclaimer: &Reclaimer) -> Result<Self> {
        let handle = engine.create_corrector();
        let destructor_engine = Arc::clone(&engine);
        let corrector = reclaimer
            .track(handle, move |h| {
                // SAFETY: `h` came from `create_corrector` on this engine and
                // the reclaimer runs the destructor at most once.
                unsafe { destructor_engine.destroy_corrector(h) }
            })
            .ok_or_else(|| JamSpellError::Engine("unable to allocate spell corrector".into()))?;

        Ok(Self {
            engine,
            corrector,
            known_words_penalty: DEFAULT_PENALTY,
            unknown_words_penalty: DEFAULT_PENALTY,
            max_candidates_to_check: DEFAULT_MAX_CANDIDATES_TO_CHECK,
        })
    }

    /// The native handle this corrector owns.
    pub fn handle(&self) -> NativeHandle {
        self.corrector.handle()
    }

    // =========================================================================
    // Parameters
    // =========================================================================

    /// Penalty applied to known words.
    pub fn known_words_penalty(&self) -> f64 {
        self.known_words_penalty
    }

    /// Penalty applied to unknown words.
    pub fn unknown_words_penalty(&self) -> f64 {
        self.unknown_words_penalty
    }

    /// Maximum number of candidates examined by [`fix_fragment`](Self::fix_fragment)
    /// and [`candidates`](Self::candidates).
    pub fn max_candidates_to_check(&self) -> usize {
        self.max_candidates_to_check
    }

    pub fn set_known_words_penalty(&mut self, penalty: f64) {
        self.known_words_penalty = penalty;
        self.push_penalties();
    }

    pub fn set_unknown_words_penalty(&mut self, penalty: f64) {
        self.unknown_words_penalty = penalty;
        self.push_penalties();
    }

    pub fn set_max_candidates_to_check(&mut self, count: usize) {
        self.max_candidates_to_check = count;
        // SAFETY: the handle is owned by `self` and live.
        unsafe { self.engine.set_max_candidates_to_check(self.handle(), count) };
    }

    fn push_penalties(&self) {
        // SAFETY: the handle is owned by `self` and live.
        unsafe {
            self.engine.set_penalty(
                self.handle(),
                self.known_words_penalty,
                self.unknown_words_penalty,
            )
        };
    }

    // =========================================================================
    // Models
    // =========================================================================

    /// Load a pre-trained language model from disk.
    ///
    /// Models are not portable across platforms: a model must come from the
    /// same native module that is loaded now. Loading a model built on
    /// another platform can make the engine hang instead of failing.
    pub fn load_lang_model(&mut self, model: impl AsRef<Path>) -> Result<()> {
        let model = model.as_ref();
        // SAFETY: the handle is owned by `self` and live.
        if unsafe { self.engine.load(self.handle(), model) }? {
            tracing::debug!(model = %model.display(), "language model loaded");
            Ok(())
        } else {
            Err(JamSpellError::Engine("Unable to load model".into()))
        }
    }

    /// Load a model from a stream. The bytes are written to a temporary file
    /// first, since the engine only reads models from disk. The same
    /// platform caveat as [`load_lang_model`](Self::load_lang_model) applies.
    pub fn load_lang_model_from_reader(&mut self, reader: &mut dyn Read) -> Result<()> {
        let temp = write_temp(reader, ".bin")
            .map_err(|e| JamSpellError::io("Unable to save stream to temporary file", e))?;
        self.load_lang_model(&temp)
    }

    /// Train a model from `data`, only considering characters listed in
    /// `alphabet`, and save it to `model`.
    ///
    /// Training is slow; prefer shipping pre-trained models.
    pub fn train_lang_model(
        &mut self,
        data: impl AsRef<Path>,
        alphabet: impl AsRef<Path>,
        model: impl AsRef<Path>,
    ) -> Result<()> {
        let (data, alphabet, model) = (data.as_ref(), alphabet.as_ref(), model.as_ref());
        // SAFETY: the handle is owned by `self` and live.
        if unsafe { self.engine.train(self.handle(), data, alphabet, model) }? {
            tracing::debug!(data = %data.display(), model = %model.display(), "language model trained");
            Ok(())
        } else {
            Err(JamSpellError::Engine("Unable to train model".into()))
        }
    }

    /// Train a model and save it to a temporary file, returned so the
    /// caller can keep or persist it.
    pub fn train_lang_model_to_temp(
        &mut self,
        data: impl AsRef<Path>,
        alphabet: impl AsRef<Path>,
    ) -> Result<TempPath> {
        let model = tempfile::Builder::new()
            .prefix("jamspell-")
            .suffix(".bin")
            .tempfile()
            .map_err(|e| JamSpellError::io("Unable to create temporary model file", e))?
            .into_temp_path();
        self.train_lang_model(data, alphabet, &model)?;
        Ok(model)
    }

    // =========================================================================
    // Correction
    // =========================================================================

    /// Candidates for `sentence[position]`, best first. The first candidate
    /// is what [`fix_fragment`](Self::fix_fragment) would pick; if it equals
    /// the word itself, the engine considers the word correct.
    ///
    /// A `position` past the end of `sentence` has no candidates.
    pub fn candidates<S: AsRef<str>>(&self, sentence: &[S], position: usize) -> Result<Vec<String>> {
        if position >= sentence.len() {
            return Ok(Vec::new());
        }
        let words: Vec<&str> = sentence.iter().map(AsRef::as_ref).collect();
        // SAFETY: the handle is owned by `self` and live; `position` is in
        // bounds.
        unsafe { self.engine.candidates(self.handle(), &words, position) }
    }

    /// Replace every word considered a typo with its best fix. Casing and
    /// punctuation are left as they are.
    pub fn fix_fragment(&self, text: &str) -> Result<String> {
        // SAFETY: the handle is owned by `self` and live.
        unsafe { self.engine.correct(self.handle(), text, false) }
    }

    /// Like [`fix_fragment`](Self::fix_fragment), also normalizing letter
    /// case and punctuation.
    pub fn fix_fragment_normalized(&self, text: &str) -> Result<String> {
        // SAFETY: the handle is owned by `self` and live.
        unsafe { self.engine.correct(self.handle(), text, true) }
    }
}

impl fmt::Debug for SpellCorrector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpellCorrector")
            .field("handle", &self.handle())
            .field("known_words_penalty", &self.known_words_penalty)
            .field("unknown_words_penalty", &self.unknown_words_penalty)
            .field("max_candidates_to_check", &self.max_candidates_to_check)
            .finish()
    }
}

fn write_temp(reader: &mut dyn Read, suffix: &str) -> io::Result<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("jamspell-")
        .suffix(suffix)
        .tempfile()?;
    io::copy(reader, file.as_file_mut())?;
    Ok(file.into_temp_path())
}
