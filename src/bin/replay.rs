use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process;

use uncertainty_trials::replay::{read_session_dump, verify};

/// Verify session dumps named on the command line, or one path per stdin line.
fn main() {
    let mut paths: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        let stdin = io::stdin();
        for line in stdin.lock().lines().flatten() {
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                paths.push(PathBuf::from(trimmed));
            }
        }
    }
    if paths.is_empty() {
        eprintln!("usage: replay <session_dump.json>...");
        process::exit(2);
    }

    let mut failed = 0;
    for path in &paths {
        let export = match read_session_dump(path) {
            Ok(e) => e,
            Err(err) => {
                eprintln!("{}: {:#}", path.display(), err);
                failed += 1;
                continue;
            }
        };
        let report = verify(&export);
        let status = if report.matches { "match" } else { "mismatch" };
        println!(
            "file={} participant_id={} rounds={} status={status}",
            path.display(),
            export.session.participant_id,
            report.rounds
        );
        for m in &report.mismatches {
            println!("  {}", m);
        }
        if !report.matches {
            failed += 1;
        }
    }
    if failed > 0 {
        process::exit(1);
    }
}
