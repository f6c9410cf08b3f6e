use tracing::warn;

use crate::codepage::CodePage;
use crate::error::PrinterError;

pub const ESC: u8 = 0x1B;
pub const GS: u8 = 0x1D;
pub const LF: u8 = 0x0A;

/// `ESC @`: reset the printer to its power-on state.
pub const INIT: [u8; 2] = [ESC, 0x40];
/// `ESC a 1`
pub const ALIGN_CENTER: [u8; 3] = [ESC, 0x61, 0x01];
/// `ESC a 0`
pub const ALIGN_LEFT: [u8; 3] = [ESC, 0x61, 0x00];
/// `GS ( k` function 181: print the stored symbol.
pub const QR_PRINT: [u8; 8] = [GS, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x51, 0x30];

/// Model 2, the model every current ESC/POS printer supports.
pub const QR_MODEL_2: u8 = 0x32;
/// Largest QR payload accepted, in bytes.
pub const QR_MAX_PAYLOAD: usize = 800;

/// One ESC/POS command unit, written to the printer as-is or split to the
/// transport's write size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Frame(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// QR error correction level, stored as the byte the printer expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QrErrorLevel {
    L = 0x30,
    M = 0x31,
    Q = 0x32,
    H = 0x33,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QrSettings {
    pub module_size: u8,
    pub error_level: QrErrorLevel,
}

/// How lines of a text job are turned into bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextEncoding {
    pub code_page: CodePage,
    /// Send lines the code page cannot represent as UTF-8 instead of dropping them.
    pub utf8_fallback: bool,
}

impl Default for TextEncoding {
    fn default() -> Self {
        Self {
            code_page: CodePage::default(),
            utf8_fallback: true,
        }
    }
}

/// A print job as the caller submits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintJob {
    Text(String),
    QrCode(String),
}

impl PrintJob {
    /// Build the frame sequence for this job.
    pub fn encode(&self, encoding: &TextEncoding) -> Result<Vec<Frame>, PrinterError> {
        match self {
            PrintJob::Text(text) => Ok(encode_text(text, encoding)),
            PrintJob::QrCode(data) => encode_qr(data),
        }
    }
}

/// `ESC t n`: select character code table.
pub fn select_code_page(code_page: CodePage) -> [u8; 3] {
    [ESC, 0x74, code_page.table_index()]
}

/// `GS ( k` function 165: select QR model.
pub fn qr_select_model(model: u8) -> [u8; 9] {
    [GS, 0x28, 0x6B, 0x04, 0x00, 0x31, 0x41, model, 0x00]
}

/// `GS ( k` function 167: module size in dots.
pub fn qr_set_size(size: u8) -> [u8; 8] {
    [GS, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x43, size]
}

/// `GS ( k` function 169: error correction level.
pub fn qr_set_error_level(level: QrErrorLevel) -> [u8; 8] {
    [GS, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x45, level as u8]
}

/// `GS ( k` function 180: store symbol data.
///
/// The length field counts the payload plus the three `cn fn m` bytes and is
/// sent little-endian.
pub fn qr_store_data(payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() + 3) as u16;
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&[GS, 0x28, 0x6B]);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&[0x31, 0x50, 0x30]);
    out.extend_from_slice(payload);
    out
}

/// Module size and error level for a payload of `len` bytes.
pub fn qr_settings(len: usize) -> QrSettings {
    match len {
        0..=100 => QrSettings {
            module_size: 4,
            error_level: QrErrorLevel::M,
        },
        101..=300 => QrSettings {
            module_size: 5,
            error_level: QrErrorLevel::M,
        },
        _ => QrSettings {
            module_size: 6,
            error_level: QrErrorLevel::L,
        },
    }
}

/// Frames for a plain text job.
///
/// - `text`: newline-delimited; `\r\n` is accepted and trailing blank lines are skipped
/// - `encoding`: code page and fallback policy
///
/// Returns `[INIT, ESC t n, line+LF..., LF, LF, LF]`
pub fn encode_text(text: &str, encoding: &TextEncoding) -> Vec<Frame> {
    let mut frames = vec![
        Frame::new(INIT),
        Frame::new(select_code_page(encoding.code_page)),
    ];

    let mut lines: Vec<&str> = text.lines().collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    for line in lines {
        let mut bytes = match encoding.code_page.encode(line) {
            Some(bytes) => bytes,
            None if encoding.utf8_fallback => {
                warn!(
                    "line not representable in {:?}, sending as UTF-8: {:?}",
                    encoding.code_page, line
                );
                line.as_bytes().to_vec()
            }
            None => {
                warn!("dropping line not representable in {:?}: {:?}", encoding.code_page, line);
                continue;
            }
        };
        bytes.push(LF);
        frames.push(Frame::new(bytes));
    }

    for _ in 0..3 {
        frames.push(Frame::new([LF]));
    }
    frames
}

/// Frames for a QR code job.
///
/// Fails with `PayloadTooLarge` before anything is built if `data` is longer
/// than [`QR_MAX_PAYLOAD`] bytes.
pub fn encode_qr(data: &str) -> Result<Vec<Frame>, PrinterError> {
    let payload = data.as_bytes();
    if payload.is_empty() {
        return Err(PrinterError::InvalidRequest(
            "QR code data cannot be empty".into(),
        ));
    }
    if payload.len() > QR_MAX_PAYLOAD {
        return Err(PrinterError::PayloadTooLarge {
            len: payload.len(),
            max: QR_MAX_PAYLOAD,
        });
    }
    if payload.len() > 200 {
        warn!("QR data is long ({} bytes), some printers may reject it", payload.len());
    }

    let settings = qr_settings(payload.len());
    Ok(vec![
        Frame::new(INIT),
        Frame::new(ALIGN_CENTER),
        Frame::new(qr_select_model(QR_MODEL_2)),
        Frame::new(qr_set_size(settings.module_size)),
        Frame::new(qr_set_error_level(settings.error_level)),
        Frame::new(qr_store_data(payload)),
        Frame::new(QR_PRINT),
        Frame::new([LF]),
        Frame::new([LF]),
        Frame::new(ALIGN_LEFT),
        Frame::new([LF]),
        Frame::new([LF]),
        Frame::new([LF]),
    ])
}

/// Splits data into chunks of given size.
///
/// - `data`: input bytes
/// - `chunk_size`: size of each chunk, 0 means no limit
///
/// Returns Vec of byte slices
pub fn chunk_data(data: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    if chunk_size == 0 {
        return vec![data];
    }
    data.chunks(chunk_size).collect()
}
