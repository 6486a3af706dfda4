// Fix text from stdin with a trained model.
//
// Usage:
//   JAMSPELL_RESOURCE_PATH=/path/to/resources \
//     cargo run -p jamspell-native --example fix_stdin -- model.bin < input.txt
use std::io::{self, BufRead, Write};

use jamspell_native::{BootstrapState, SpellCorrector, global_state};

fn main() {
    let Some(model) = std::env::args().nth(1) else {
        eprintln!("usage: fix_stdin MODEL");
        std::process::exit(2);
    };

    let mut corrector = SpellCorrector::new().unwrap_or_else(|e| {
        eprintln!("error: {e} (bootstrap state: {:?})", global_state());
        std::process::exit(1);
    });
    if global_state() == BootstrapState::Skipped {
        eprintln!("note: using a native module supplied by the host process");
    }
    corrector
        .load_lang_model(&model)
        .unwrap_or_else(|e| panic!("failed to load {model}: {e}"));

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("error reading stdin: {e}");
                break;
            }
        };
        match corrector.fix_fragment(&line) {
            Ok(fixed) => {
                let _ = writeln!(out, "{fixed}");
            }
            Err(e) => eprintln!("error: {e}"),
        }
    }
}
