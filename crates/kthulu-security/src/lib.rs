//! Security annotations turned into access policies, and the in-memory
//! authorization core that evaluates them.

pub mod authz;
pub mod model;
pub mod synthesizer;

pub use authz::{
    AuthorizationCore, REASON_DEFAULT_ALLOW, REASON_ERROR, REASON_INVALID_REQUEST,
    REASON_NOT_SATISFIED, REASON_NO_POLICY, REASON_TIMEOUT,
};
pub use model::*;
pub use synthesizer::{
    is_security_tag, parse_conditions, split_list, PolicySynthesizer, SecurityTagInfo,
};
