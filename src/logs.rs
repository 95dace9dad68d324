use std::fs;
use std::io;
use std::path::Path;

/// Returns the last `lines` lines of a log file.
///
/// Invalid UTF-8 is replaced rather than rejected; database and web server
/// logs on Windows are frequently written in the local code page.
pub fn tail_lines(path: &Path, lines: usize) -> io::Result<String> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let all_lines: Vec<&str> = text.lines().collect();

    let start = all_lines.len().saturating_sub(lines);
    let mut out = all_lines[start..].join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    Ok(out)
}
