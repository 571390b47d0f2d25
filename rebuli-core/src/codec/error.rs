/// Reasons a code cannot be turned into a [`Reading`](crate::Reading).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("code {0} does not fit in 32 unsigned bits")]
    OutOfRange(i128),
    #[error("selector {selector} does not map to a known sensor type")]
    UnrecognizedType { selector: u8 },
}
