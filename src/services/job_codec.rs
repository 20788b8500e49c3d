use crate::error::{AppResult, PortabilityError};
use crate::models::job::{Job, JobId};
use base64::{engine::general_purpose, Engine as _};
use uuid::{Uuid, Variant};

const ENCODED_LEN: usize = 22;

/// Converts job ids to and from the opaque token carried in the session cookie.
///
/// Tokens are the unpadded URL-safe base64 form of the id's 16 bytes. Decoding is
/// strict: the token must be canonical and must describe a random (v4) id, so
/// arbitrary strings never decode into some other valid-looking id.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobIdCodec;

impl JobIdCodec {
    pub fn encode(&self, job: &Job) -> String {
        self.encode_id(&job.id())
    }

    pub fn encode_id(&self, id: &JobId) -> String {
        general_purpose::URL_SAFE_NO_PAD.encode(id.as_uuid().as_bytes())
    }

    pub fn decode(&self, token: &str) -> AppResult<JobId> {
        if token.len() != ENCODED_LEN {
            return Err(PortabilityError::InvalidIdentity(format!(
                "expected {ENCODED_LEN} characters, got {}",
                token.len()
            )));
        }

        let bytes = general_purpose::URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| PortabilityError::InvalidIdentity(format!("not a job token: {e}")))?;

        let uuid = Uuid::from_slice(&bytes)
            .map_err(|e| PortabilityError::InvalidIdentity(format!("not a job token: {e}")))?;

        if uuid.get_version_num() != 4 || uuid.get_variant() != Variant::RFC4122 {
            return Err(PortabilityError::InvalidIdentity(
                "token does not describe a job id".to_string(),
            ));
        }

        let id = JobId::from_uuid(uuid);
        // Trailing bits of the last character are ignored by base64, so insist on
        // the one canonical spelling.
        if self.encode_id(&id) != token {
            return Err(PortabilityError::InvalidIdentity(
                "token is not in canonical form".to_string(),
            ));
        }

        Ok(id)
    }
}
