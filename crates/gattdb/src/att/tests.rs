//! Unit tests for ATT error codes and access evaluation

use super::access::*;
use super::constants::*;
use super::error::AttErrorCode;
use super::types::*;

#[test]
fn test_error_code_conversion() {
    assert_eq!(AttErrorCode::from(0x0C), AttErrorCode::InsufficientEncryptionKeySize);
    assert_eq!(AttErrorCode::from(0x85), AttErrorCode::ApplicationError(0x85));
    assert_eq!(AttErrorCode::from(0xFD), AttErrorCode::CommonProfileError(0xFD));
    assert_eq!(AttErrorCode::from(0x42), AttErrorCode::Unknown(0x42));

    let code: u8 = AttErrorCode::InsufficientAuthorization.into();
    assert_eq!(code, ATT_ERROR_INSUFFICIENT_AUTHORIZATION);
    let code: u8 = AttErrorCode::ApplicationError(ATT_ERROR_ENUM_OUT_OF_RANGE).into();
    assert_eq!(code, 0x80);
}

#[test]
fn test_permission_bits_match_wire_layout() {
    assert_eq!(AttPermissions::READWRITEABLE.bits(), 0x0003);
    assert_eq!(AttPermissions::AUTHEN_REQ_READ.bits(), 0x0208);
    assert_eq!(AttPermissions::AUTHEN_REQ_WRITE.bits(), 0x0104);
    assert_eq!(AttFlags::CHECK_WRITE.bits(), 0x0010);
}

#[test]
fn test_not_permitted() {
    let link = LinkSecurity::encrypted(AuthenticationLevel::SecureConnections);
    assert_eq!(
        evaluate(AttPermissions::READABLE, 0, AccessOp::Write, &link),
        Err(AttErrorCode::WriteNotPermitted)
    );
    assert_eq!(
        evaluate(AttPermissions::WRITEABLE, 0, AccessOp::Read, &link),
        Err(AttErrorCode::ReadNotPermitted)
    );
    assert_eq!(evaluate(AttPermissions::READABLE, 0, AccessOp::Read, &LinkSecurity::open()), Ok(()));
}

#[test]
fn test_key_size_checked_before_authentication() {
    let perms = AttPermissions::READABLE | AttPermissions::AUTHEN_REQ_READ | AttPermissions::MITM_READ;

    // Unencrypted, unpaired link fails on key size first
    assert_eq!(
        evaluate(perms, 16, AccessOp::Read, &LinkSecurity::open()),
        Err(AttErrorCode::InsufficientEncryptionKeySize)
    );

    let short_key = LinkSecurity::encrypted(AuthenticationLevel::Authenticated).with_key_size(7);
    assert_eq!(
        evaluate(perms, 16, AccessOp::Read, &short_key),
        Err(AttErrorCode::InsufficientEncryptionKeySize)
    );
    assert_eq!(evaluate(perms, 7, AccessOp::Read, &short_key), Ok(()));
}

#[test]
fn test_authentication_levels() {
    let plain = AttPermissions::WRITEABLE | AttPermissions::AUTHEN_REQ_WRITE;
    let mitm = plain | AttPermissions::MITM_WRITE;

    assert_eq!(
        evaluate(plain, 0, AccessOp::Write, &LinkSecurity::open()),
        Err(AttErrorCode::InsufficientAuthentication)
    );

    let just_works = LinkSecurity::encrypted(AuthenticationLevel::Unauthenticated);
    assert_eq!(evaluate(plain, 0, AccessOp::Write, &just_works), Ok(()));
    assert_eq!(
        evaluate(mitm, 0, AccessOp::Write, &just_works),
        Err(AttErrorCode::InsufficientAuthentication)
    );

    let mitm_link = LinkSecurity::encrypted(AuthenticationLevel::Authenticated);
    assert_eq!(evaluate(mitm, 0, AccessOp::Write, &mitm_link), Ok(()));

    // Paired but encryption not yet re-established
    let unencrypted = LinkSecurity {
        authentication: AuthenticationLevel::Authenticated,
        ..LinkSecurity::default()
    };
    assert_eq!(
        evaluate(mitm, 0, AccessOp::Write, &unencrypted),
        Err(AttErrorCode::InsufficientEncryption)
    );

    // Signed-write style requirement does not need encryption
    let noec = AttPermissions::WRITEABLE | AttPermissions::AUTHEN_REQ_WRITE_NOEC;
    assert_eq!(evaluate(noec, 0, AccessOp::Write, &unencrypted), Ok(()));
}

#[test]
fn test_secure_connections_requirement() {
    let perms = AttPermissions::READABLE | AttPermissions::SC_MITM_READ;
    assert_eq!(
        evaluate(perms, 0, AccessOp::Read, &LinkSecurity::encrypted(AuthenticationLevel::Authenticated)),
        Err(AttErrorCode::InsufficientAuthentication)
    );
    assert_eq!(
        evaluate(perms, 0, AccessOp::Read, &LinkSecurity::encrypted(AuthenticationLevel::SecureConnections)),
        Ok(())
    );
}

#[test]
fn test_authorization_is_last() {
    let perms = AttPermissions::READABLE
        | AttPermissions::AUTHEN_REQ_READ
        | AttPermissions::AUTHOR_REQ_READ;

    // Authentication failure wins over authorization failure
    assert_eq!(
        evaluate(perms, 0, AccessOp::Read, &LinkSecurity::open()),
        Err(AttErrorCode::InsufficientAuthentication)
    );

    let link = LinkSecurity::encrypted(AuthenticationLevel::Unauthenticated);
    assert_eq!(
        evaluate(perms, 0, AccessOp::Read, &link),
        Err(AttErrorCode::InsufficientAuthorization)
    );
    assert_eq!(evaluate(perms, 0, AccessOp::Read, &link.with_authorization(true)), Ok(()));

    // Write side requirements do not affect reads
    let read_only_auth = AttPermissions::READWRITEABLE | AttPermissions::AUTHOR_REQ_WRITE;
    assert_eq!(evaluate(read_only_auth, 0, AccessOp::Read, &LinkSecurity::open()), Ok(()));
    assert_eq!(
        evaluate(read_only_auth, 0, AccessOp::Write, &LinkSecurity::open()),
        Err(AttErrorCode::InsufficientAuthorization)
    );
}
