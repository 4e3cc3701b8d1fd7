//! Converts the textual stacktraces zap writes into structured frames.
//!
//! Zap writes two lines per frame, outermost call first:
//!
//! ```text
//! github.com/acme/app/store.(*Client).Get
//!     /go/src/github.com/acme/app/store/client.go:33
//! ```

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub module: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    pub abs_path: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
}

/// Frames ordered innermost call first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stacktrace {
    pub frames: Vec<Frame>,
}

impl Stacktrace {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Builds frames from pairs of `callsite` / `path:line` lines. Input with
/// an odd number of lines yields no frames.
pub fn transcode(text: &str) -> Stacktrace {
    let lines: Vec<&str> = text.trim().lines().collect();
    if lines.len() % 2 == 1 {
        return Stacktrace::default();
    }

    let mut frames: Vec<Frame> = lines
        .chunks_exact(2)
        .map(|pair| frame(pair[0], pair[1]))
        .collect();

    // Sentry renders the first frame as the innermost one.
    frames.reverse();

    Stacktrace { frames }
}

fn frame(callsite: &str, location: &str) -> Frame {
    let callsite = callsite.trim();
    let (parent, last) = match callsite.rsplit_once('/') {
        Some((parent, last)) => (Some(parent), last),
        None => (None, callsite),
    };
    let (package, function) = match last.split_once('.') {
        Some((package, function)) => (package, Some(function.to_string())),
        None => (last, None),
    };
    // A callsite with no path keeps the bare package as its module, no
    // leading slash.
    let module = match parent {
        Some(parent) => format!("{parent}/{package}"),
        None => package.to_string(),
    };

    let location = location.trim();
    let (path, lineno) = match location.split_once(':') {
        Some((path, line)) => (path, line.parse().ok()),
        None => (location, None),
    };

    Frame {
        module,
        function,
        abs_path: path.to_string(),
        filename: path.to_string(),
        lineno,
    }
}
