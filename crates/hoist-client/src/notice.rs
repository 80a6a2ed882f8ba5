//! Batch results and the completion notice shown to the user.

use tracing::warn;

/// Why a batch died before (or while) its items were attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAbort {
    /// The server's key did not match the pinned fingerprint, or the pin
    /// store itself was unusable.
    Untrusted,
    /// The server could not be reached or the handshake failed.
    ConnectFailed,
    /// The server rejected the credentials.
    LoginFailed,
}

/// Aggregate outcome of one drained batch. Every queued item ends up in
/// either `succeeded` or `failed`, aborted batches included.
#[derive(Debug, Default, Clone)]
pub struct BatchReport {
    pub succeeded: u32,
    pub failed: u32,
    /// Download links of the successful uploads, in queue order.
    pub links: Vec<String>,
    pub abort: Option<BatchAbort>,
}

/// What the presentation layer should show once a batch is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub message: String,
    /// Text to place on the system clipboard, when any.
    pub clipboard: Option<String>,
    pub is_error: bool,
}

impl Notice {
    fn error(title: &str, message: &str) -> Self {
        Self {
            title: title.to_string(),
            message: message.to_string(),
            clipboard: None,
            is_error: true,
        }
    }
}

/// Map a batch report onto the notice the user sees.
///
/// The clipboard shapes are: exactly one clean success copies that link,
/// more than two clean successes copy the whole list joined by newlines.
/// Everything else, exactly two clean successes included, gets the generic
/// error-styled completion message with nothing on the clipboard.
pub fn completion_notice(report: &BatchReport) -> Notice {
    if let Some(abort) = report.abort {
        return match abort {
            BatchAbort::Untrusted => Notice::error(
                "Connection untrusted!",
                "The server's key does not match the pinned fingerprint.",
            ),
            BatchAbort::ConnectFailed => {
                Notice::error("Upload failed!", "Could not connect to the server.")
            }
            BatchAbort::LoginFailed => {
                Notice::error("Login failed!", "Please check your account settings.")
            }
        };
    }

    if report.failed == 0 && report.succeeded == 1 {
        return Notice {
            title: "Upload finished!".to_string(),
            message: "A link to your file has been copied to your clipboard.".to_string(),
            clipboard: report.links.first().cloned(),
            is_error: false,
        };
    }

    if report.failed == 0 && report.succeeded > 2 {
        return Notice {
            title: "Uploads finished!".to_string(),
            message: "A list of download links has been copied to your clipboard.".to_string(),
            clipboard: Some(report.links.join("\n")),
            is_error: false,
        };
    }

    Notice::error(
        "Upload completed with errors!",
        "Some files could not be uploaded.",
    )
}

/// Put the notice's clipboard text on the system clipboard.
///
/// Headless systems have no clipboard to speak of; failures are logged and
/// reported as `false` so the caller can fall back to showing the links.
pub fn apply_clipboard(notice: &Notice) -> bool {
    let Some(text) = notice.clipboard.as_deref() else {
        return false;
    };
    match arboard::Clipboard::new() {
        Ok(mut clipboard) => match clipboard.set_text(text.to_string()) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Could not write to the clipboard");
                false
            }
        },
        Err(e) => {
            warn!(error = %e, "Clipboard unavailable");
            false
        }
    }
}
