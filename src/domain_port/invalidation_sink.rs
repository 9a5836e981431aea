/// Told when the session cannot be recovered and the app must fall back to sign-in.
pub trait SessionInvalidationSink: Send + Sync {
    fn session_invalidated(&self);
}
