//! Access control evaluation for remote attribute access

use super::error::AttErrorCode;
use super::types::{AttPermissions, AuthenticationLevel, LinkSecurity};

/// Kind of remote access being evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOp {
    Read,
    Write,
}

/// Per-operation view of the permission bits
struct Requirements {
    permitted: bool,
    authentication: bool,
    mitm: bool,
    secure_connections: bool,
    encryption: bool,
    authorization: bool,
}

impl Requirements {
    fn of(perms: AttPermissions, op: AccessOp) -> Self {
        match op {
            AccessOp::Read => Self {
                permitted: perms.can_read(),
                authentication: perms.contains(AttPermissions::AUTHEN_REQ_READ_NOEC),
                mitm: perms.contains(AttPermissions::MITM_READ),
                secure_connections: perms.contains(AttPermissions::SC_MITM_READ),
                encryption: perms.contains(AttPermissions::ENCRYPT_REQ_READ),
                authorization: perms.read_requires_authorization(),
            },
            AccessOp::Write => Self {
                permitted: perms.can_write(),
                authentication: perms.contains(AttPermissions::AUTHEN_REQ_WRITE_NOEC),
                mitm: perms.contains(AttPermissions::MITM_WRITE),
                secure_connections: perms.contains(AttPermissions::SC_MITM_WRITE),
                encryption: perms.contains(AttPermissions::ENCRYPT_REQ_WRITE),
                authorization: perms.write_requires_authorization(),
            },
        }
    }
}

/// Decide whether `op` on an attribute with `perms` and a minimum
/// `encrypt_key_size` (0 for none) is allowed on a link in state `link`.
///
/// Checks run in a fixed order and the first failure decides the error:
/// operation permitted, key size, authentication (including the encryption
/// that goes with it), authorization.
pub fn evaluate(
    perms: AttPermissions,
    encrypt_key_size: u8,
    op: AccessOp,
    link: &LinkSecurity,
) -> Result<(), AttErrorCode> {
    let req = Requirements::of(perms, op);

    if !req.permitted {
        return Err(match op {
            AccessOp::Read => AttErrorCode::ReadNotPermitted,
            AccessOp::Write => AttErrorCode::WriteNotPermitted,
        });
    }

    if encrypt_key_size > 0 && link.effective_key_size() < encrypt_key_size {
        return Err(AttErrorCode::InsufficientEncryptionKeySize);
    }

    if req.secure_connections
        && (link.authentication < AuthenticationLevel::SecureConnections || !link.encrypted)
    {
        return Err(AttErrorCode::InsufficientAuthentication);
    }

    if req.authentication {
        let needed = if req.mitm {
            AuthenticationLevel::Authenticated
        } else {
            AuthenticationLevel::Unauthenticated
        };
        if link.authentication < needed {
            return Err(AttErrorCode::InsufficientAuthentication);
        }
        if req.encryption && !link.encrypted {
            return Err(AttErrorCode::InsufficientEncryption);
        }
    }

    if req.authorization && !link.authorized {
        return Err(AttErrorCode::InsufficientAuthorization);
    }

    Ok(())
}
