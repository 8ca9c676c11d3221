use crate::pipe::MessagePipeHandle;

/// A transferable handle of any kind.
///
/// Handles are exclusively owned. Moving one into a message and writing the
/// message transfers ownership to the reader on the other side; dropping one
/// closes the underlying object.
#[derive(Debug, Default)]
pub enum UntypedHandle {
    /// The invalid handle. Encodes as "no handle" in nullable positions.
    #[default]
    Invalid,
    /// One endpoint of a message pipe.
    MessagePipe(MessagePipeHandle),
}

impl UntypedHandle {
    pub fn is_valid(&self) -> bool {
        !matches!(self, UntypedHandle::Invalid)
    }

    /// Take the handle, leaving [`UntypedHandle::Invalid`] behind.
    pub fn take(&mut self) -> UntypedHandle {
        std::mem::take(self)
    }

    /// Convert into a message pipe endpoint, if that is what this is.
    pub fn into_message_pipe(self) -> Option<MessagePipeHandle> {
        match self {
            UntypedHandle::MessagePipe(handle) => Some(handle),
            UntypedHandle::Invalid => None,
        }
    }

    pub fn as_message_pipe(&self) -> Option<&MessagePipeHandle> {
        match self {
            UntypedHandle::MessagePipe(handle) => Some(handle),
            UntypedHandle::Invalid => None,
        }
    }
}

impl From<MessagePipeHandle> for UntypedHandle {
    fn from(handle: MessagePipeHandle) -> Self {
        UntypedHandle::MessagePipe(handle)
    }
}

impl From<Option<MessagePipeHandle>> for UntypedHandle {
    fn from(handle: Option<MessagePipeHandle>) -> Self {
        handle.map_or(UntypedHandle::Invalid, UntypedHandle::MessagePipe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::create_message_pipe;

    #[test]
    fn take_leaves_invalid() {
        let (a, _b) = create_message_pipe();
        let mut handle = UntypedHandle::from(a);
        assert!(handle.is_valid());

        let taken = handle.take();
        assert!(taken.is_valid());
        assert!(!handle.is_valid());
        assert!(taken.into_message_pipe().is_some());
    }

    #[test]
    fn none_converts_to_invalid() {
        let handle = UntypedHandle::from(None::<MessagePipeHandle>);
        assert!(!handle.is_valid());
        assert!(handle.as_message_pipe().is_none());
    }
}
