// Native engine capability.
//
// `NativeEngine` is the seam between the corrector facade and the native
// module. `SymbolEngine` implements it over the module's C ABI:
//
//   void*  jamspell_corrector_new(void)
//   void   jamspell_corrector_delete(void* corrector)
//   int    jamspell_train_lang_model(void*, const char* data,
//                                    const char* alphabet, const char* model)
//   int    jamspell_load_lang_model(void*, const char* model)
//   char*  jamspell_fix_fragment(void*, const char* text)
//   char*  jamspell_fix_fragment_normalized(void*, const char* text)
//   char** jamspell_get_candidates(void*, const char* const* words,
//                                  size_t count, size_t position)
//   void   jamspell_set_penalty(void*, double known, double unknown)
//   void   jamspell_set_max_candidates_to_check(void*, size_t count)
//   void   jamspell_free_string(char*)
//   void   jamspell_free_string_array(char**)
//
// Strings are UTF-8 and NUL-terminated. Candidate arrays are
// NULL-terminated. Everything returned is released with the matching free
// function.

use std::ffi::{CStr, CString, c_char, c_double, c_int, c_void};
use std::path::Path;
use std::ptr;
use std::sync::{Arc, OnceLock};

use jamspell_core::{JamSpellError, NativeHandle, Result};
use libloading::Library;

use crate::bootstrap::{self, Outcome};

/// Operations the native spell correction engine exposes over handles.
///
/// Only allocation is safe to call. Everything else takes a corrector
/// handle that the engine dereferences, so the caller has to vouch for it.
/// [`SpellCorrector`](crate::SpellCorrector) upholds the contract for the
/// handle it owns.
///
/// # Safety
///
/// For every `unsafe` method, `corrector` must have been returned by
/// [`create_corrector`](Self::create_corrector) on the same engine, must not
/// be null, and must not have been passed to
/// [`destroy_corrector`](Self::destroy_corrector) yet. Calls on one corrector
/// must not overlap with its destruction.
///
/// ```compile_fail,E0133
/// use jamspell_native::{NativeEngine, NativeHandle};
///
/// fn release(engine: &dyn NativeEngine, handle: NativeHandle) {
///     engine.destroy_corrector(handle);
/// }
/// ```
pub trait NativeEngine: Send + Sync {
    /// Allocate a corrector. Returns [`NativeHandle::NULL`] on failure.
    fn create_corrector(&self) -> NativeHandle;

    /// Free a corrector. After this call the handle is dangling.
    ///
    /// # Safety
    ///
    /// See the [trait docs](NativeEngine#safety). Each handle may be
    /// destroyed at most once.
    unsafe fn destroy_corrector(&self, corrector: NativeHandle);

    /// Train a model from `data` restricted to `alphabet`, saving it to
    /// `model`. Returns whether the engine succeeded.
    ///
    /// # Safety
    ///
    /// `corrector` must be live; see the [trait docs](NativeEngine#safety).
    unsafe fn train(
        &self,
        corrector: NativeHandle,
        data: &Path,
        alphabet: &Path,
        model: &Path,
    ) -> Result<bool>;

    /// Load a trained model. Returns whether the engine succeeded.
    ///
    /// # Safety
    ///
    /// `corrector` must be live; see the [trait docs](NativeEngine#safety).
    unsafe fn load(&self, corrector: NativeHandle, model: &Path) -> Result<bool>;

    /// Fix a fragment of text, optionally normalizing case and punctuation.
    ///
    /// # Safety
    ///
    /// `corrector` must be live; see the [trait docs](NativeEngine#safety).
    unsafe fn correct(&self, corrector: NativeHandle, text: &str, normalize: bool)
    -> Result<String>;

    /// Ranked candidates for `words[position]`.
    ///
    /// # Safety
    ///
    /// `corrector` must be live and `position < words.len()`.
    unsafe fn candidates(
        &self,
        corrector: NativeHandle,
        words: &[&str],
        position: usize,
    ) -> Result<Vec<String>>;

    /// # Safety
    ///
    /// `corrector` must be live; see the [trait docs](NativeEngine#safety).
    unsafe fn set_penalty(&self, corrector: NativeHandle, known_words: f64, unknown_words: f64);

    /// # Safety
    ///
    /// `corrector` must be live; see the [trait docs](NativeEngine#safety).
    unsafe fn set_max_candidates_to_check(&self, corrector: NativeHandle, count: usize);
}

type NewFn = unsafe extern "C" fn() -> *mut c_void;
type DeleteFn = unsafe extern "C" fn(*mut c_void);
type TrainFn =
    unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char, *const c_char) -> c_int;
type LoadFn = unsafe extern "C" fn(*mut c_void, *const c_char) -> c_int;
type FixFn = unsafe extern "C" fn(*mut c_void, *const c_char) -> *mut c_char;
type CandidatesFn =
    unsafe extern "C" fn(*mut c_void, *const *const c_char, usize, usize) -> *mut *mut c_char;
type PenaltyFn = unsafe extern "C" fn(*mut c_void, c_double, c_double);
type MaxCandidatesFn = unsafe extern "C" fn(*mut c_void, usize);
type FreeStringFn = unsafe extern "C" fn(*mut c_char);
type FreeStringArrayFn = unsafe extern "C" fn(*mut *mut c_char);

/// [`NativeEngine`] backed by symbols resolved from a loaded library.
pub struct SymbolEngine {
    // Function pointers below are only valid while this is alive.
    _library: Arc<Library>,
    new: NewFn,
    delete: DeleteFn,
    train: TrainFn,
    load: LoadFn,
    fix: FixFn,
    fix_normalized: FixFn,
    candidates: CandidatesFn,
    set_penalty: PenaltyFn,
    set_max_candidates: MaxCandidatesFn,
    free_string: FreeStringFn,
    free_string_array: FreeStringArrayFn,
}

macro_rules! symbol {
    ($library:expr, $name:literal, $ty:ty) => {{
        // SAFETY: the declared type matches the C ABI documented at the top
        // of this module; the pointer is kept next to the `Arc<Library>`
        // that owns it.
        let symbol = unsafe { $library.get::<$ty>(concat!($name, "\0").as_bytes()) }.map_err(|e| {
            JamSpellError::MissingSymbol {
                symbol: $name.to_string(),
                message: e.to_string(),
            }
        })?;
        *symbol
    }};
}

impl SymbolEngine {
    /// Resolve every entry point from `library`.
    pub fn from_library(library: Arc<Library>) -> Result<Self> {
        Ok(Self {
            new: symbol!(library, "jamspell_corrector_new", NewFn),
            delete: symbol!(library, "jamspell_corrector_delete", DeleteFn),
            train: symbol!(library, "jamspell_train_lang_model", TrainFn),
            load: symbol!(library, "jamspell_load_lang_model", LoadFn),
            fix: symbol!(library, "jamspell_fix_fragment", FixFn),
            fix_normalized: symbol!(library, "jamspell_fix_fragment_normalized", FixFn),
            candidates: symbol!(library, "jamspell_get_candidates", CandidatesFn),
            set_penalty: symbol!(library, "jamspell_set_penalty", PenaltyFn),
            set_max_candidates: symbol!(library, "jamspell_set_max_candidates_to_check", MaxCandidatesFn),
            free_string: symbol!(library, "jamspell_free_string", FreeStringFn),
            free_string_array: symbol!(library, "jamspell_free_string_array", FreeStringArrayFn),
            _library: library,
        })
    }

    /// Resolve entry points from modules already loaded into the process,
    /// for embedders that supply the engine themselves.
    pub fn from_process() -> Result<Self> {
        Self::from_library(Arc::new(this_process()?))
    }

    /// Take ownership of a native string and copy it out. The string is
    /// freed even when it is not valid UTF-8.
    fn take_string(&self, raw: *mut c_char) -> Result<Option<String>> {
        if raw.is_null() {
            return Ok(None);
        }
        // SAFETY: `raw` is a non-null, NUL-terminated string returned by the
        // engine and not yet freed.
        let value = owned_utf8(unsafe { CStr::from_ptr(raw) });
        // SAFETY: ownership of `raw` was transferred to us by the engine.
        unsafe { (self.free_string)(raw) };
        value.map(Some)
    }

    fn take_string_array(&self, raw: *mut *mut c_char) -> Result<Vec<String>> {
        if raw.is_null() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let mut i = 0;
        loop {
            // SAFETY: the array is NULL-terminated, so every index up to and
            // including the terminator is in bounds.
            let item = unsafe { *raw.add(i) };
            if item.is_null() {
                break;
            }
            // SAFETY: non-null entries are NUL-terminated strings.
            out.push(owned_utf8(unsafe { CStr::from_ptr(item) }));
            i += 1;
        }
        // SAFETY: the array and its strings belong to us and are freed once.
        unsafe { (self.free_string_array)(raw) };
        out.into_iter().collect()
    }
}

fn owned_utf8(value: &CStr) -> Result<String> {
    value
        .to_str()
        .map(str::to_owned)
        .map_err(|e| JamSpellError::Engine(format!("engine returned invalid UTF-8: {e}")))
}

#[cfg(unix)]
fn this_process() -> Result<Library> {
    Ok(libloading::os::unix::Library::this().into())
}

#[cfg(windows)]
fn this_process() -> Result<Library> {
    libloading::os::windows::Library::this()
        .map(Into::into)
        .map_err(|e| JamSpellError::Load {
            path: "<process>".to_string(),
            message: e.to_string(),
        })
}

#[cfg(not(any(unix, windows)))]
fn this_process() -> Result<Library> {
    Err(JamSpellError::NotLoaded)
}

fn c_string(value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| JamSpellError::InvalidString)
}

fn c_path(path: &Path) -> Result<CString> {
    let value = path.to_str().ok_or(JamSpellError::InvalidString)?;
    c_string(value)
}

impl NativeEngine for SymbolEngine {
    fn create_corrector(&self) -> NativeHandle {
        // SAFETY: no arguments; returns an owned pointer or NULL.
        NativeHandle::from_ptr(unsafe { (self.new)() })
    }

    unsafe fn destroy_corrector(&self, corrector: NativeHandle) {
        if corrector.is_null() {
            return;
        }
        // SAFETY: the caller guarantees `corrector` is live and destroyed at
        // most once.
        unsafe { (self.delete)(corrector.as_ptr()) }
    }

    unsafe fn train(
        &self,
        corrector: NativeHandle,
        data: &Path,
        alphabet: &Path,
        model: &Path,
    ) -> Result<bool> {
        let (data, alphabet, model) = (c_path(data)?, c_path(alphabet)?, c_path(model)?);
        // SAFETY: live corrector; the strings outlive the call.
        let ok = unsafe {
            (self.train)(corrector.as_ptr(), data.as_ptr(), alphabet.as_ptr(), model.as_ptr())
        };
        Ok(ok != 0)
    }

    unsafe fn load(&self, corrector: NativeHandle, model: &Path) -> Result<bool> {
        let model = c_path(model)?;
        // SAFETY: live corrector; the string outlives the call.
        let ok = unsafe { (self.load)(corrector.as_ptr(), model.as_ptr()) };
        Ok(ok != 0)
    }

    unsafe fn correct(
        &self,
        corrector: NativeHandle,
        text: &str,
        normalize: bool,
    ) -> Result<String> {
        let text = c_string(text)?;
        let fix = if normalize { self.fix_normalized } else { self.fix };
        // SAFETY: live corrector; the string outlives the call.
        let raw = unsafe { fix(corrector.as_ptr(), text.as_ptr()) };
        self.take_string(raw)?
            .ok_or_else(|| JamSpellError::Engine("engine returned no text".to_string()))
    }

    unsafe fn candidates(
        &self,
        corrector: NativeHandle,
        words: &[&str],
        position: usize,
    ) -> Result<Vec<String>> {
        let owned = words
            .iter()
            .map(|w| c_string(w))
            .collect::<Result<Vec<_>>>()?;
        let ptrs: Vec<*const c_char> = owned.iter().map(|s| s.as_ptr()).collect();
        let words_ptr = if ptrs.is_empty() { ptr::null() } else { ptrs.as_ptr() };
        // SAFETY: live corrector; `ptrs` and the strings it points into
        // outlive the call.
        let raw = unsafe { (self.candidates)(corrector.as_ptr(), words_ptr, ptrs.len(), position) };
        self.take_string_array(raw)
    }

    unsafe fn set_penalty(&self, corrector: NativeHandle, known_words: f64, unknown_words: f64) {
        // SAFETY: live corrector; plain values.
        unsafe { (self.set_penalty)(corrector.as_ptr(), known_words, unknown_words) }
    }

    unsafe fn set_max_candidates_to_check(&self, corrector: NativeHandle, count: usize) {
        // SAFETY: live corrector; plain value.
        unsafe { (self.set_max_candidates)(corrector.as_ptr(), count) }
    }
}

// ── Process-wide engine ──────────────────────────────────────────

/// The engine for this process, bootstrapping the native module first.
///
/// Bootstrap errors are returned unchanged. When the bootstrap was skipped
/// the entry points are looked up among modules already in the process.
pub fn shared() -> Result<Arc<dyn NativeEngine>> {
    static SHARED: OnceLock<Result<Arc<SymbolEngine>>> = OnceLock::new();

    let outcome = bootstrap::initialize()?;
    let engine = SHARED.get_or_init(|| {
        let engine = match outcome {
            Outcome::Loaded(module) => match module.library() {
                Some(library) => SymbolEngine::from_library(Arc::clone(library)),
                None => SymbolEngine::from_process(),
            },
            Outcome::Skipped(reason) => {
                tracing::debug!(%reason, "resolving engine from process symbols");
                SymbolEngine::from_process()
            }
        };
        engine.map(Arc::new)
    });

    match engine {
        Ok(engine) => Ok(Arc::clone(engine) as Arc<dyn NativeEngine>),
        Err(e) => Err(e.clone()),
    }
}
