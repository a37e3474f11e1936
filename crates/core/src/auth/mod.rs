mod error;
mod flags;
mod functions;
mod traits;
mod types;
mod validation;

pub use error::{AuthError, ProviderError, ProviderErrorKind, StorageError};
pub use flags::{
    AUTH_COMPLETE_KEY, AUTH_REDIRECT_COUNT_KEY, FLAG_KEYS, LAST_REDIRECT_TIME_KEY,
    SIGN_IN_ATTEMPT_KEY, SIGN_IN_TIMESTAMP_KEY,
};
pub use functions::{
    attempt_deadline, begin_attempt, choose_sign_in_method, detect_redirect_loop,
    is_attempt_stale,
};
pub use traits::{
    Clock, EnvironmentProbe, IdentityProvider, Location, Result, SessionStorage, SystemClock,
};
pub use types::{
    AuthPhase, AuthSnapshot, AuthUser, BrowserEnvironment, LoopCheck, LoopPolicy, SessionFlags,
    SignInMethod,
};
pub use validation::{
    annotate_redirect_loop, validate_return_to, ERROR_QUERY_PARAM, REDIRECT_LOOP_ERROR,
};
