//! Unit tests for the attribute database

use super::*;
use crate::att::{
    AttErrorCode, AttFlags, AttPermissions, AuthenticationLevel, LinkSecurity,
    CHARACTERISTIC_UUID, CLIENT_CHAR_CONFIG_UUID, PRIMARY_SERVICE_UUID,
};
use crate::error::DbError;
use crate::gap::{BdAddr, DevAddr};
use crate::gatt::{CharProps, ClientCharConfig, GattUuid};
use crate::persist::codec::{encode_root, RootImage, ServiceImage};
use crate::persist::{MemoryStore, PersistenceManager, RecordId};
use std::sync::{Arc, Mutex};

const RADIO: BdAddr = BdAddr::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
const OTHER_RADIO: BdAddr = BdAddr::new([0x99, 0x88, 0x77, 0x66, 0x55, 0x44]);
const PEER_A: DevAddr = DevAddr::public([0x01, 0x00, 0x00, 0x00, 0x00, 0xA0]);
const PEER_B: DevAddr = DevAddr::random([0x02, 0x00, 0x00, 0x00, 0x00, 0xC0]);

const CCC_ON: [u8; 2] = [0x01, 0x00];
const CCC_OFF: [u8; 2] = [0x00, 0x00];

static ROM_VALUES: [&[u8]; 1] = [b"gattdb"];
static ROM_ATTRS: [Attribute; 3] = [
    Attribute::new(AttPermissions::READABLE, PRIMARY_SERVICE_UUID, StoredValue::V16(0x1800)),
    Attribute::new(
        AttPermissions::READABLE,
        0x2A00,
        StoredValue::OctetSeq {
            len: 6,
            max: 6,
            index: 1,
        },
    ),
    Attribute::new(
        AttPermissions::READWRITEABLE,
        CLIENT_CHAR_CONFIG_UUID,
        StoredValue::ClientOwnInst(CoiDefault::Ccc(ClientCharConfig::empty())),
    )
    .with_flags(AttFlags::VAL_DYNAMIC),
];
static ROM_SERVICES: [RomService; 1] = [RomService {
    start_handle: 1,
    transport: ServiceTransport::All,
    attributes: &ROM_ATTRS,
}];
static ROM: RomImage = RomImage {
    values: &ROM_VALUES,
    services: &ROM_SERVICES,
};

fn open_db() -> GattDatabase<MemoryStore> {
    GattDatabase::open(MemoryStore::new(), RADIO, None).unwrap()
}

fn open_link(peer: DevAddr) -> Link {
    Link::le(peer, LinkSecurity::open())
}

/// A service with a characteristic declaration at index 1, a writeable
/// octet value (max 20) at index 2 and its CCCD at index 3
fn build_service(db: &mut GattDatabase<MemoryStore>) -> ServiceId {
    let id = db.allocate_service(&ServiceParms::primary(0x180Du16, 4)).unwrap();
    db.add_static(
        id,
        1,
        &StaticAttr::new(
            CHARACTERISTIC_UUID,
            AttPermissions::READABLE,
            StaticValue::CharDecl {
                props: CharProps::READ | CharProps::WRITE | CharProps::NOTIFY,
                value_offset: 2,
                uuid: GattUuid::from(0x2A37u16),
            },
        ),
    )
    .unwrap();
    db.add_dynamic(
        id,
        2,
        &DynamicAttr::new(
            0x2A37u16,
            AttPermissions::READWRITEABLE,
            DynamicValue::OctetSeq {
                data: b"init".to_vec(),
                max: 20,
            },
        ),
    )
    .unwrap();
    db.add_dynamic(
        id,
        3,
        &DynamicAttr::new(
            CLIENT_CHAR_CONFIG_UUID,
            AttPermissions::READWRITEABLE,
            DynamicValue::ccc(),
        ),
    )
    .unwrap();
    id
}

/// Single attribute service around `template`, already added
fn single_attr_service(db: &mut GattDatabase<MemoryStore>, template: DynamicAttr) -> ServiceId {
    let id = db.allocate_service(&ServiceParms::primary(0xFFF0u16, 2)).unwrap();
    db.add_dynamic(id, 1, &template).unwrap();
    db.add_service(id).unwrap();
    id
}

fn recorder() -> (ServiceHandler, Arc<Mutex<Vec<ServerEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let handler: ServiceHandler = Arc::new(move |event: &ServerEvent| {
        sink.lock().unwrap().push(event.clone());
    });
    (handler, events)
}

fn read(db: &mut GattDatabase<MemoryStore>, peer: DevAddr, handle: u16) -> Vec<u8> {
    match db.read_attribute(&open_link(peer), handle, 0) {
        Ok(ReadOutcome::Complete(bytes)) => bytes,
        other => panic!("unexpected read outcome {:?}", other),
    }
}

/// Store that can be told to refuse record removal or writes to the root
/// record
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    refuse_remove: bool,
    refuse_root_write: bool,
}

impl PersistenceManager for FlakyStore {
    fn create(&mut self) -> Option<RecordId> {
        self.inner.create()
    }

    fn remove(&mut self, id: RecordId) -> bool {
        !self.refuse_remove && self.inner.remove(id)
    }

    fn read(&mut self, id: RecordId, buf: &mut [u8], offset: u32) -> usize {
        self.inner.read(id, buf, offset)
    }

    fn write(&mut self, id: RecordId, data: &[u8], offset: u32) -> bool {
        !(self.refuse_root_write && id == 1) && self.inner.write(id, data, offset)
    }

    fn get_length(&mut self, id: RecordId) -> u32 {
        self.inner.get_length(id)
    }

    fn set_length(&mut self, id: RecordId, len: u32) -> bool {
        !(self.refuse_root_write && id == 1) && self.inner.set_length(id, len)
    }
}

#[test]
fn test_auto_allocation() {
    let mut db = open_db();
    let id = db.allocate_service(&ServiceParms::primary(0x180Fu16, 3)).unwrap();
    let info = db.get_service(id.start_handle()).unwrap();
    assert!(info.range.start >= 1);
    assert_eq!(info.range.end, info.range.start + 2);
    assert_eq!(info.range.start, 1);
    assert!(!info.active);
    assert_eq!(info.uuid, GattUuid::from(0x180Fu16));

    // Spare handles are left behind the highest service
    let next = db.allocate_service(&ServiceParms::primary(0x180Au16, 2)).unwrap();
    assert_eq!(next.start_handle(), 3 + 1 + 10);
}

#[test]
fn test_explicit_start_must_not_overlap() {
    let mut db = open_db();
    db.allocate_service(&ServiceParms::primary(0x1800u16, 5).with_start_handle(0x20))
        .unwrap();
    assert_eq!(
        db.allocate_service(&ServiceParms::primary(0x1801u16, 2).with_start_handle(0x24)),
        Err(DbError::HandleRangeUnavailable)
    );
    assert_eq!(
        db.allocate_service(&ServiceParms::primary(0x1801u16, 2).with_start_handle(0x1F)),
        Err(DbError::HandleRangeUnavailable)
    );
    let id = db
        .allocate_service(&ServiceParms::primary(0x1801u16, 2).with_start_handle(0x25))
        .unwrap();
    assert_eq!(id.start_handle(), 0x25);

    assert_eq!(
        db.allocate_service(&ServiceParms::primary(0x1802u16, 0)),
        Err(DbError::InvalidParameter("service needs at least one handle"))
    );
    assert_eq!(
        db.allocate_service(&ServiceParms::primary(0x1802u16, 3).with_start_handle(0xFFFE)),
        Err(DbError::HandleRangeUnavailable)
    );
}

#[test]
fn test_lowest_gap_used_when_tail_is_full() {
    let mut db = open_db();
    db.allocate_service(&ServiceParms::primary(0x1800u16, 4).with_start_handle(0x0008))
        .unwrap();
    db.allocate_service(&ServiceParms::primary(0x1801u16, 0x10).with_start_handle(0xFFF0))
        .unwrap();

    let id = db.allocate_service(&ServiceParms::primary(0x1802u16, 3)).unwrap();
    assert_eq!(id.start_handle(), 1);
    let id = db.allocate_service(&ServiceParms::primary(0x1803u16, 5)).unwrap();
    assert_eq!(id.start_handle(), 0x000C);
}

#[test]
fn test_template_rejection() {
    let mut db = open_db();
    let id = db.allocate_service(&ServiceParms::primary(0x1800u16, 3)).unwrap();
    let statics = db.static_table.occupied();
    let dynamics = db.dynamic_table.occupied();

    let writeable_static = StaticAttr::new(
        GattUuid::from_u128(0x12345678_0000_1000_8000_00805F9B34FB),
        AttPermissions::READWRITEABLE,
        StaticValue::V8(1),
    );
    assert!(matches!(
        db.add_static(id, 1, &writeable_static),
        Err(DbError::InvalidTemplate(_))
    ));

    let out_of_range = DynamicAttr::new(
        0x2A19u16,
        AttPermissions::READABLE,
        DynamicValue::Enum8 {
            value: 9,
            min: 0,
            max: 3,
        },
    );
    assert_eq!(db.add_dynamic(id, 1, &out_of_range), Err(DbError::OutOfRange));

    let too_long = DynamicAttr::new(
        0x2A00u16,
        AttPermissions::READWRITEABLE,
        DynamicValue::OctetSeq {
            data: vec![0; 8],
            max: 4,
        },
    );
    assert_eq!(
        db.add_dynamic(id, 1, &too_long),
        Err(DbError::InvalidLength { len: 8, max: 4 })
    );

    let bad_key = DynamicAttr::new(0x2A00u16, AttPermissions::READABLE, DynamicValue::V8(0))
        .with_key_size(3);
    assert!(matches!(
        db.add_dynamic(id, 1, &bad_key),
        Err(DbError::InvalidTemplate(_))
    ));

    // Nothing leaked into the tables
    assert_eq!(db.static_table.occupied(), statics);
    assert_eq!(db.dynamic_table.occupied(), dynamics);
}

#[test]
fn test_full_dynamic_table_releases_type_entry() {
    let mut db = open_db();
    let id = db.allocate_service(&ServiceParms::primary(0x1800u16, 2)).unwrap();
    while db.dynamic_table.add(&[]).is_ok() {}
    assert_eq!(db.dynamic_table.num_entries(), INVALID_INDEX);
    let statics = db.static_table.occupied();

    let attr = DynamicAttr::new(
        GattUuid::from_u128(0x0000FF01_0000_1000_8000_00805F9B34FB),
        AttPermissions::READWRITEABLE,
        DynamicValue::OctetSeq {
            data: b"abc".to_vec(),
            max: 8,
        },
    );
    assert_eq!(db.add_dynamic(id, 1, &attr), Err(DbError::NoResources));
    assert_eq!(db.static_table.occupied(), statics);
    assert_eq!(db.static_table.num_entries(), 0);
    assert_eq!(db.get_attrib_value(id, 1), Err(DbError::InvalidAttribute(1)));

    // The slot is still free once the table has room again
    db.dynamic_table.remove(5);
    assert_eq!(db.add_dynamic(id, 1, &attr), Ok(id.start_handle() + 1));
    assert_eq!(read_value(&db, id, 1), b"abc".to_vec());
}

#[test]
fn test_full_static_table_releases_type_entry() {
    let mut db = open_db();
    let id = db.allocate_service(&ServiceParms::primary(0x1800u16, 2)).unwrap();
    while db.static_table.add(&[]).is_ok() {}
    // Room for exactly one more entry: the 128-bit type fits, its value not
    db.static_table.remove(INVALID_INDEX - 1);
    let statics = db.static_table.occupied();

    let attr = StaticAttr::new(
        GattUuid::from_u128(0x0000FF02_0000_1000_8000_00805F9B34FB),
        AttPermissions::READABLE,
        StaticValue::Uuid128([0x42; 16]),
    );
    assert_eq!(db.add_static(id, 1, &attr), Err(DbError::NoResources));
    assert_eq!(db.static_table.occupied(), statics);
    assert!(db.static_table.get(INVALID_INDEX - 1).is_none());
    assert_eq!(db.get_attrib_value(id, 1), Err(DbError::InvalidAttribute(1)));
}

#[test]
fn test_index_checks() {
    let mut db = open_db();
    let id = db.allocate_service(&ServiceParms::primary(0x1800u16, 2)).unwrap();
    let attr = DynamicAttr::new(0x2A00u16, AttPermissions::READABLE, DynamicValue::V8(0));

    assert!(matches!(
        db.add_dynamic(id, 0, &attr),
        Err(DbError::InvalidParameter(_))
    ));
    assert_eq!(db.add_dynamic(id, 2, &attr), Err(DbError::AttributeNotFound(2)));
    assert_eq!(db.add_dynamic(id, 1, &attr), Ok(id.start_handle() + 1));
    assert_eq!(db.add_dynamic(id, 1, &attr), Err(DbError::InUse(1)));

    db.add_service(id).unwrap();
    let other = db.allocate_service(&ServiceParms::primary(0x1801u16, 3)).unwrap();
    assert_eq!(db.get_attrib_value(other, 1), Err(DbError::InvalidAttribute(1)));
}

#[test]
fn test_dynamic_octets_keep_their_index() {
    let mut db = open_db();
    let id = build_service(&mut db);
    let index = db.attribute(id, 2).unwrap().value.table_index();

    db.set_attrib_value(
        id,
        2,
        &AttValue::OctetSeq {
            data: b"hello".to_vec(),
            max: 20,
        },
    )
    .unwrap();

    let desc = db.get_attrib_value(id, 2).unwrap();
    assert_eq!(
        desc.value,
        AttValue::OctetSeq {
            data: b"hello".to_vec(),
            max: 20,
        }
    );
    assert_eq!(desc.attr_type, GattUuid::from(0x2A37u16));
    assert!(desc.flags.contains(AttFlags::VAL_DYNAMIC));
    assert_eq!(db.attribute(id, 2).unwrap().value.table_index(), index);
}

#[test]
fn test_set_attrib_value_errors() {
    let mut db = open_db();
    let id = build_service(&mut db);

    assert_eq!(
        db.set_attrib_value(id, 1, &AttValue::V8(1)),
        Err(DbError::Immutable)
    );
    assert_eq!(
        db.set_attrib_value(id, 2, &AttValue::V16(1)),
        Err(DbError::TypeMismatch)
    );
    assert_eq!(
        db.set_attrib_value(
            id,
            2,
            &AttValue::OctetSeq {
                data: vec![0; 21],
                max: 512,
            }
        ),
        Err(DbError::InvalidLength { len: 21, max: 20 })
    );

    let enum_id = single_attr_service(
        &mut db,
        DynamicAttr::new(
            0x2A19u16,
            AttPermissions::READWRITEABLE,
            DynamicValue::Enum8 {
                value: 1,
                min: 0,
                max: 3,
            },
        ),
    );
    assert_eq!(
        db.set_attrib_value(
            enum_id,
            1,
            &AttValue::Enum8 {
                value: 9,
                min: 0,
                max: 255,
            }
        ),
        Err(DbError::OutOfRange)
    );
    db.set_attrib_value(
        enum_id,
        1,
        &AttValue::Enum8 {
            value: 3,
            min: 0,
            max: 0,
        },
    )
    .unwrap();
    assert_eq!(
        db.get_attrib_value(enum_id, 1).unwrap().value,
        AttValue::Enum8 {
            value: 3,
            min: 0,
            max: 3,
        }
    );
}

#[test]
fn test_inactive_service_is_invisible() {
    let mut db = open_db();
    let id = build_service(&mut db);
    let handle = id.start_handle() + 2;

    assert_eq!(
        db.read_attribute(&open_link(PEER_A), handle, 0),
        Err(AttErrorCode::InvalidHandle)
    );
    db.add_service(id).unwrap();
    assert_eq!(read(&mut db, PEER_A, handle), b"init".to_vec());
    assert_eq!(
        db.read_attribute(&open_link(PEER_A), 0x0100, 0),
        Err(AttErrorCode::InvalidHandle)
    );
}

#[test]
fn test_char_decl_carries_absolute_value_handle() {
    let mut db = open_db();
    db.allocate_service(&ServiceParms::primary(0x1800u16, 2)).unwrap();
    let id = build_service(&mut db);
    db.add_service(id).unwrap();

    let value_handle = id.start_handle() + 2;
    let mut expected = vec![0x1A];
    expected.extend_from_slice(&value_handle.to_le_bytes());
    expected.extend_from_slice(&[0x37, 0x2A]);
    assert_eq!(read(&mut db, PEER_A, id.start_handle() + 1), expected);
    assert_eq!(read(&mut db, PEER_A, id.start_handle()), vec![0x0D, 0x18]);
}

#[test]
fn test_remote_octet_writes() {
    let mut db = open_db();
    let id = build_service(&mut db);
    db.add_service(id).unwrap();
    let link = open_link(PEER_A);
    let handle = id.start_handle() + 2;

    assert_eq!(
        db.write_attribute(&link, handle, 4, b"!!"),
        Ok(WriteOutcome::Complete)
    );
    assert_eq!(read(&mut db, PEER_A, handle), b"init!!".to_vec());

    // A write truncates the value at its end
    db.write_attribute(&link, handle, 2, b"ok").unwrap();
    assert_eq!(read(&mut db, PEER_A, handle), b"inok".to_vec());

    assert_eq!(
        db.write_attribute(&link, handle, 5, b"x"),
        Err(AttErrorCode::InvalidOffset)
    );
    assert_eq!(
        db.write_attribute(&link, handle, 0, &[0u8; 21]),
        Err(AttErrorCode::InvalidAttributeValueLength)
    );
    assert_eq!(
        db.read_attribute(&link, handle, 2),
        Ok(ReadOutcome::Complete(b"ok".to_vec()))
    );
    assert_eq!(
        db.read_attribute(&link, handle, 5),
        Err(AttErrorCode::InvalidOffset)
    );
}

#[test]
fn test_permissions_gate_remote_access() {
    let mut db = open_db();
    let id = build_service(&mut db);
    db.add_service(id).unwrap();

    assert_eq!(
        db.write_attribute(&open_link(PEER_A), id.start_handle() + 1, 0, &[0]),
        Err(AttErrorCode::WriteNotPermitted)
    );

    let secure = single_attr_service(
        &mut db,
        DynamicAttr::new(
            0x2A00u16,
            AttPermissions::READABLE | AttPermissions::AUTHEN_REQ_READ,
            DynamicValue::V16(0xBEEF),
        ),
    );
    let handle = secure.start_handle() + 1;
    assert_eq!(
        db.read_attribute(&open_link(PEER_A), handle, 0),
        Err(AttErrorCode::InsufficientAuthentication)
    );
    let paired = Link::le(
        PEER_A,
        LinkSecurity::encrypted(AuthenticationLevel::Unauthenticated),
    );
    assert_eq!(
        db.read_attribute(&paired, handle, 0),
        Ok(ReadOutcome::Complete(vec![0xEF, 0xBE]))
    );
}

#[test]
fn test_transport_restriction() {
    let mut db = open_db();
    let id = db
        .allocate_service(&ServiceParms::primary(0x1812u16, 2).with_transport(ServiceTransport::LeOnly))
        .unwrap();
    db.add_dynamic(
        id,
        1,
        &DynamicAttr::new(0x2A4Du16, AttPermissions::READABLE, DynamicValue::V8(7)),
    )
    .unwrap();
    db.add_service(id).unwrap();
    let handle = id.start_handle() + 1;

    assert_eq!(read(&mut db, PEER_A, handle), vec![7]);
    assert_eq!(
        db.read_attribute(&Link::br_edr(PEER_A, LinkSecurity::open()), handle, 0),
        Err(AttErrorCode::ApplicationError(0x81))
    );
}

#[test]
fn test_ccc_values_are_per_peer() {
    let mut db = open_db();
    let id = build_service(&mut db);
    db.add_service(id).unwrap();
    db.peer_connected(&PEER_A, false).unwrap();
    db.peer_connected(&PEER_B, false).unwrap();
    let handle = id.start_handle() + 3;

    db.write_attribute(&open_link(PEER_A), handle, 0, &CCC_ON).unwrap();

    assert_eq!(read(&mut db, PEER_A, handle), CCC_ON.to_vec());
    assert_eq!(read(&mut db, PEER_B, handle), CCC_OFF.to_vec());
    assert_eq!(
        db.get_client_own_inst_value(id, 3, &PEER_B).unwrap(),
        CoiValue::Ccc(ClientCharConfig::empty())
    );
    assert_eq!(
        db.get_client_own_inst_value(id, 3, &PEER_A).unwrap(),
        CoiValue::Ccc(ClientCharConfig::NOTIFICATION)
    );
    assert_eq!(
        db.write_attribute(&open_link(PEER_A), handle, 0, &[1]),
        Err(AttErrorCode::InvalidAttributeValueLength)
    );
    assert_eq!(
        db.get_client_own_inst_value(id, 2, &PEER_A),
        Err(DbError::NotClientOwnInstance)
    );
}

#[test]
fn test_writing_the_default_stores_nothing() {
    let mut db = open_db();
    let id = build_service(&mut db);
    db.add_service(id).unwrap();

    db.set_client_own_inst_value(id, 3, &PEER_A, &CoiValue::Ccc(ClientCharConfig::empty()))
        .unwrap();
    assert!(!db.has_client_own_values(&PEER_A));

    assert_eq!(
        db.set_client_own_inst_value(id, 3, &PEER_A, &CoiValue::Octets(vec![1])),
        Err(DbError::TypeMismatch)
    );
}

#[test]
fn test_find_client_own_inst_records() {
    let mut db = open_db();
    let id = build_service(&mut db);
    db.add_service(id).unwrap();
    let on = CoiValue::Ccc(ClientCharConfig::NOTIFICATION);
    let both = CoiValue::Ccc(ClientCharConfig::NOTIFICATION | ClientCharConfig::INDICATION);
    db.set_client_own_inst_value(id, 3, &PEER_A, &on).unwrap();
    db.set_client_own_inst_value(id, 3, &PEER_B, &both).unwrap();

    let found = db.find_client_own_inst_records(id, 3, &mut []).unwrap();
    assert_eq!(found, FoundRecords { returned: 0, total: 2 });

    let mut one = [CoiRecord::default()];
    let found = db.find_client_own_inst_records(id, 3, &mut one).unwrap();
    assert_eq!(found, FoundRecords { returned: 1, total: 2 });

    let mut all = vec![CoiRecord::default(); 4];
    let found = db.find_client_own_inst_records(id, 3, &mut all).unwrap();
    assert_eq!(found.returned, 2);
    assert!(all.contains(&CoiRecord { peer: PEER_A, value: on }));
    assert!(all.contains(&CoiRecord { peer: PEER_B, value: both }));
}

#[test]
fn test_octet_client_own_values() {
    let mut db = open_db();
    let id = single_attr_service(
        &mut db,
        DynamicAttr::new(
            0x2B29u16,
            AttPermissions::READWRITEABLE,
            DynamicValue::ClientOwnInst {
                default: CoiValue::Octets(vec![0xAA]),
                max: 8,
            },
        ),
    );
    let handle = id.start_handle() + 1;
    let link = open_link(PEER_A);

    assert_eq!(read(&mut db, PEER_A, handle), vec![0xAA]);
    db.write_attribute(&link, handle, 1, &[0xBB, 0xCC]).unwrap();
    assert_eq!(read(&mut db, PEER_A, handle), vec![0xAA, 0xBB, 0xCC]);
    assert_eq!(read(&mut db, PEER_B, handle), vec![0xAA]);
    assert_eq!(
        db.write_attribute(&link, handle, 0, &[0; 9]),
        Err(AttErrorCode::InvalidAttributeValueLength)
    );

    assert_eq!(
        db.set_client_own_inst_value(id, 1, &PEER_B, &CoiValue::Octets(vec![0; 9])),
        Err(DbError::InvalidLength { len: 9, max: 8 })
    );
}

#[test]
fn test_unbonded_values_dropped_on_disconnect() {
    let mut db = open_db();
    let id = build_service(&mut db);
    db.add_service(id).unwrap();
    let handle = id.start_handle() + 3;

    db.peer_connected(&PEER_A, true).unwrap();
    db.peer_connected(&PEER_B, false).unwrap();
    db.write_attribute(&open_link(PEER_A), handle, 0, &CCC_ON).unwrap();
    db.write_attribute(&open_link(PEER_B), handle, 0, &CCC_ON).unwrap();

    db.peer_disconnected(&PEER_A);
    db.peer_disconnected(&PEER_B);
    assert!(db.has_client_own_values(&PEER_A));
    assert!(!db.has_client_own_values(&PEER_B));
    assert!(!db.is_connected(&PEER_A));

    // Coming back without a bond wipes what the old bond left behind
    db.peer_connected(&PEER_A, false).unwrap();
    assert!(!db.has_client_own_values(&PEER_A));
}

#[test]
fn test_lifecycle_requires_no_connections() {
    let mut db = open_db();
    let id = build_service(&mut db);

    db.peer_connected(&PEER_A, false).unwrap();
    assert_eq!(db.add_service(id), Err(DbError::Busy));
    assert!(db.add_service(id).unwrap_err().is_busy());
    db.peer_disconnected(&PEER_A);

    let range = db.add_service(id).unwrap();
    assert_eq!(range.start, id.start_handle());
    assert_eq!(range.end, id.start_handle() + 3);
    assert_eq!(db.add_service(id), Err(DbError::Busy));
    assert_eq!(db.add_static(id, 1, &StaticAttr::new(0x2A00u16, AttPermissions::READABLE, StaticValue::V8(0))), Err(DbError::Busy));

    db.peer_connected(&PEER_B, false).unwrap();
    assert_eq!(db.inactivate_service(id), Err(DbError::Busy));
    assert_eq!(db.remove_service(id), Err(DbError::Busy));
    db.peer_disconnected(&PEER_B);

    db.inactivate_service(id).unwrap();
    assert_eq!(db.inactivate_service(id), Err(DbError::NotActive));
    db.remove_service(id).unwrap();
    assert!(db.get_service(id.start_handle()).is_none());
    assert_eq!(db.remove_service(id), Err(DbError::InvalidService));
}

#[test]
fn test_remove_service_frees_everything() {
    let mut db = open_db();
    let id = build_service(&mut db);
    db.add_service(id).unwrap();
    db.set_client_own_inst_value(id, 3, &PEER_A, &CoiValue::Ccc(ClientCharConfig::INDICATION))
        .unwrap();
    assert!(db.static_table.occupied() > 0);
    assert!(db.dynamic_table.occupied() > 0);

    db.inactivate_service(id).unwrap();
    db.remove_service(id).unwrap();
    assert_eq!(db.static_table.occupied(), 0);
    assert_eq!(db.dynamic_table.occupied(), 0);
    assert!(!db.has_client_own_values(&PEER_A));
}

#[test]
fn test_service_lookup_and_enumeration() {
    let mut db = open_db();
    let uuid128 = GattUuid::from_u128(0x0000FEED_0000_1000_8000_00805F9B34FB);
    let a = db.allocate_service(&ServiceParms::primary(0x180Fu16, 2)).unwrap();
    let b = db
        .allocate_service(&ServiceParms::secondary(uuid128, 3))
        .unwrap();
    let c = db.allocate_service(&ServiceParms::primary(0x180Fu16, 1)).unwrap();

    let found = db.find_services(&GattUuid::from(0x180Fu16));
    assert_eq!(found.iter().map(|s| s.id).collect::<Vec<_>>(), vec![a, c]);
    let secondary = db.find_services(&uuid128);
    assert_eq!(secondary.len(), 1);
    assert!(!secondary[0].primary);

    let mut ctx = ServiceEnumContext::default();
    let mut visited = Vec::new();
    while let Some(info) = db.enum_services(&mut ctx) {
        visited.push(info.id);
    }
    assert_eq!(visited, vec![a, b, c]);

    assert_eq!(db.find_attribute(b.start_handle() + 2), Some((b, 2)));
    assert_eq!(db.find_attribute(b.start_handle() + 3), None);
    assert_eq!(db.service_last_attrib_index(b), Ok(2));
    assert_eq!(db.service_start_handle(c), Ok(c.start_handle()));
}

#[test]
fn test_rom_service() {
    let mut db = GattDatabase::open(MemoryStore::new(), RADIO, Some(&ROM)).unwrap();
    let id = ServiceId(1);
    let info = db.get_service(1).unwrap();
    assert!(info.rom);
    assert!(info.active);

    assert_eq!(read(&mut db, PEER_A, 2), b"gattdb".to_vec());
    assert_eq!(
        db.write_attribute(&open_link(PEER_A), 2, 0, b"x"),
        Err(AttErrorCode::WriteNotPermitted)
    );

    // Per-peer values work on ROM attributes too
    db.write_attribute(&open_link(PEER_A), 3, 0, &CCC_ON).unwrap();
    assert_eq!(read(&mut db, PEER_A, 3), CCC_ON.to_vec());
    assert_eq!(read(&mut db, PEER_B, 3), CCC_OFF.to_vec());

    assert_eq!(db.remove_service(id), Err(DbError::RomService));
    assert_eq!(
        db.set_attrib_value(id, 1, &AttValue::OctetSeq { data: b"x".to_vec(), max: 6 }),
        Err(DbError::Immutable)
    );
    assert!(matches!(
        db.add_static(id, 1, &StaticAttr::new(0x2A00u16, AttPermissions::READABLE, StaticValue::V8(0))),
        Err(DbError::RomService)
    ));

    // Automatic allocation starts behind the ROM services
    let ram = db.allocate_service(&ServiceParms::primary(0x180Fu16, 2)).unwrap();
    assert_eq!(ram.start_handle(), 3 + 1 + 10);
}

#[test]
fn test_flush_and_reopen() {
    let mut db = GattDatabase::open(MemoryStore::new(), RADIO, Some(&ROM)).unwrap();
    let id = build_service(&mut db);
    let custom_type = GattUuid::from_u128(0xA0B0C0D0_0000_1000_8000_00805F9B34FB);
    let custom = db.allocate_service(&ServiceParms::primary(custom_type, 2)).unwrap();
    db.add_dynamic(
        custom,
        1,
        &DynamicAttr::new(
            custom_type,
            AttPermissions::READWRITEABLE,
            DynamicValue::Enum16 {
                value: 300,
                min: 100,
                max: 1000,
            },
        ),
    )
    .unwrap();
    let inactive = db.allocate_service(&ServiceParms::primary(0x1810u16, 2)).unwrap();
    db.add_service(id).unwrap();
    db.add_service(custom).unwrap();

    db.set_attrib_value(
        id,
        2,
        &AttValue::OctetSeq {
            data: b"hello".to_vec(),
            max: 20,
        },
    )
    .unwrap();
    db.peer_connected(&PEER_A, true).unwrap();
    db.peer_connected(&PEER_B, false).unwrap();
    db.write_attribute(&open_link(PEER_A), id.start_handle() + 3, 0, &CCC_ON)
        .unwrap();
    db.write_attribute(&open_link(PEER_B), id.start_handle() + 3, 0, &CCC_ON)
        .unwrap();
    db.write_attribute(&open_link(PEER_A), 3, 0, &[0x02, 0x00]).unwrap();
    let address_id = db.next_address_id();
    let irk = *db.irk();

    assert!(db.is_dirty());
    db.flush().unwrap();
    assert!(!db.is_dirty());
    let store = db.close();
    assert_eq!(store.dynamic_record_ids().len(), 1);

    let mut db = GattDatabase::open(store, RADIO, Some(&ROM)).unwrap();
    assert!(!db.is_dirty());
    assert_eq!(db.irk(), &irk);
    assert_eq!(db.next_address_id(), address_id + 1);

    assert!(db.get_service(inactive.start_handle()).is_none());
    let info = db.get_service(id.start_handle()).unwrap();
    assert!(info.active);
    assert!(!info.rom);
    assert_eq!(info.range.end, id.start_handle() + 3);
    assert_eq!(db.get_service(custom.start_handle()).unwrap().uuid, custom_type);

    assert_eq!(read(&mut db, PEER_A, id.start_handle() + 2), b"hello".to_vec());
    assert_eq!(read(&mut db, PEER_A, id.start_handle() + 3), CCC_ON.to_vec());
    assert_eq!(read(&mut db, PEER_B, id.start_handle() + 3), CCC_OFF.to_vec());
    assert_eq!(read(&mut db, PEER_A, 3), vec![0x02, 0x00]);
    assert_eq!(read(&mut db, PEER_A, 2), b"gattdb".to_vec());

    let desc = db.get_attrib_value(custom, 1).unwrap();
    assert_eq!(desc.attr_type, custom_type);
    assert_eq!(
        desc.value,
        AttValue::Enum16 {
            value: 300,
            min: 100,
            max: 1000,
        }
    );

    // New allocations never collide with restored entries
    let next = build_service(&mut db);
    assert!(db.get_service(next.start_handle()).unwrap().range.start > custom.start_handle());
    assert_eq!(read_value(&db, id, 2), b"hello".to_vec());
}

fn read_value(db: &GattDatabase<MemoryStore>, id: ServiceId, index: u16) -> Vec<u8> {
    match db.get_attrib_value(id, index).unwrap().value {
        AttValue::OctetSeq { data, .. } => data,
        other => panic!("unexpected value {:?}", other),
    }
}

#[test]
fn test_reopen_for_another_radio_starts_fresh() {
    let mut db = open_db();
    let id = build_service(&mut db);
    db.add_service(id).unwrap();
    db.peer_connected(&PEER_A, true).unwrap();
    db.write_attribute(&open_link(PEER_A), id.start_handle() + 3, 0, &CCC_ON)
        .unwrap();
    db.flush().unwrap();
    let store = db.close();
    assert_eq!(store.dynamic_record_ids().len(), 1);

    let db = GattDatabase::open(store, OTHER_RADIO, None).unwrap();
    assert!(db.get_service(id.start_handle()).is_none());
    assert!(!db.has_client_own_values(&PEER_A));
    assert_eq!(db.local_address(), OTHER_RADIO);
    assert!(db.is_dirty());
    assert!(db.store().dynamic_record_ids().is_empty());
}

#[test]
fn test_corrupt_root_fails_open() {
    let mut store = MemoryStore::new();
    store.write(1, b"GTDB\x01garbage", 0);
    assert!(matches!(
        GattDatabase::open(store, RADIO, None),
        Err(OpenError {
            error: DbError::CorruptRecord { id: 1, .. },
            ..
        })
    ));
}

fn root_with(dynamic_entries: Vec<(u16, Vec<u8>)>, value: Attribute) -> MemoryStore {
    let root = RootImage {
        identity: Identity {
            irk: [0x5A; 16],
            address_id_counter: 0,
            local_addr: RADIO,
        },
        static_entries: Vec::new(),
        dynamic_entries,
        services: vec![ServiceImage {
            start_handle: 0x0010,
            transport: ServiceTransport::All,
            attributes: vec![
                Some(Attribute::new(
                    AttPermissions::READABLE,
                    PRIMARY_SERVICE_UUID,
                    StoredValue::V16(0x180D),
                )),
                Some(value),
            ],
        }],
        groups: Vec::new(),
    };
    let mut store = MemoryStore::new();
    store.write(1, &encode_root(&root).unwrap(), 0);
    store
}

#[test]
fn test_root_with_short_value_entries_fails_open() {
    let short_octets = Attribute::new(
        AttPermissions::READWRITEABLE,
        0x2A00,
        StoredValue::OctetSeq {
            len: 20,
            max: 20,
            index: 1,
        },
    )
    .with_flags(AttFlags::VAL_DYNAMIC);
    let store = root_with(vec![(1, vec![1, 2])], short_octets);
    assert!(matches!(
        GattDatabase::open(store, RADIO, None),
        Err(OpenError {
            error: DbError::CorruptRecord { id: 1, .. },
            ..
        })
    ));

    let short_enum = Attribute::new(
        AttPermissions::READABLE,
        0x2A19,
        StoredValue::Enum16 {
            index: 1,
            min: 0,
            max: 500,
        },
    )
    .with_flags(AttFlags::VAL_DYNAMIC);
    let store = root_with(vec![(1, vec![7])], short_enum);
    assert!(matches!(
        GattDatabase::open(store, RADIO, None),
        Err(OpenError {
            error: DbError::CorruptRecord { id: 1, .. },
            ..
        })
    ));

    // The same layout with a full entry opens and reads back
    let store = root_with(vec![(1, vec![0x2C, 0x01])], short_enum);
    let db = GattDatabase::open(store, RADIO, None).unwrap();
    assert_eq!(
        db.get_attrib_value(ServiceId(0x0010), 1).unwrap().value,
        AttValue::Enum16 {
            value: 300,
            min: 0,
            max: 500,
        }
    );
}

#[test]
fn test_failed_open_returns_store() {
    let mut store = MemoryStore::new();
    store.write(1, b"GTDB\x01garbage", 0);
    let mut store = match GattDatabase::open(store, RADIO, None) {
        Err(e) => e.store,
        Ok(_) => panic!("corrupt root was accepted"),
    };
    assert!(store.contains(1));

    store.remove(1);
    let db = GattDatabase::open(store, RADIO, None).unwrap();
    assert!(db.is_dirty());
    assert!(db.get_service(0x0010).is_none());
}

static SHORT_ROM_VALUES: [&[u8]; 1] = [b"ab"];
static SHORT_ROM_ATTRS: [Attribute; 2] = [
    Attribute::new(AttPermissions::READABLE, PRIMARY_SERVICE_UUID, StoredValue::V16(0x1800)),
    Attribute::new(
        AttPermissions::READABLE,
        0x2A00,
        StoredValue::OctetSeqFixed { len: 10, index: 1 },
    ),
];
static SHORT_ROM_SERVICES: [RomService; 1] = [RomService {
    start_handle: 1,
    transport: ServiceTransport::All,
    attributes: &SHORT_ROM_ATTRS,
}];
static SHORT_ROM: RomImage = RomImage {
    values: &SHORT_ROM_VALUES,
    services: &SHORT_ROM_SERVICES,
};

static UNDECLARED_ROM_ATTRS: [Attribute; 1] = [Attribute::new(
    AttPermissions::READABLE,
    0x2A19,
    StoredValue::V8(100),
)];
static UNDECLARED_ROM_SERVICES: [RomService; 1] = [RomService {
    start_handle: 1,
    transport: ServiceTransport::All,
    attributes: &UNDECLARED_ROM_ATTRS,
}];
static UNDECLARED_ROM: RomImage = RomImage {
    values: &[],
    services: &UNDECLARED_ROM_SERVICES,
};

#[test]
fn test_malformed_rom_rejected() {
    assert!(matches!(
        GattDatabase::open(MemoryStore::new(), RADIO, Some(&SHORT_ROM)),
        Err(OpenError {
            error: DbError::InvalidParameter("ROM attribute"),
            ..
        })
    ));
    assert!(matches!(
        GattDatabase::open(MemoryStore::new(), RADIO, Some(&UNDECLARED_ROM)),
        Err(OpenError {
            error: DbError::InvalidParameter("ROM service declaration"),
            ..
        })
    ));
}

#[test]
fn test_bond_created_makes_values_persistent() {
    let mut db = open_db();
    let id = build_service(&mut db);
    db.add_service(id).unwrap();
    db.peer_connected(&PEER_B, false).unwrap();
    db.write_attribute(&open_link(PEER_B), id.start_handle() + 3, 0, &CCC_ON)
        .unwrap();
    db.bond_created(&PEER_B);
    db.peer_disconnected(&PEER_B);
    assert!(db.has_client_own_values(&PEER_B));

    db.flush().unwrap();
    let db = GattDatabase::open(db.close(), RADIO, None).unwrap();
    assert_eq!(
        db.get_client_own_inst_value(id, 3, &PEER_B).unwrap(),
        CoiValue::Ccc(ClientCharConfig::NOTIFICATION)
    );
}

#[test]
fn test_bond_removal_erases_peer_record() {
    let mut db = open_db();
    let id = build_service(&mut db);
    db.add_service(id).unwrap();
    db.peer_connected(&PEER_A, true).unwrap();
    db.write_attribute(&open_link(PEER_A), id.start_handle() + 3, 0, &CCC_ON)
        .unwrap();
    db.flush().unwrap();
    assert_eq!(db.store().dynamic_record_ids().len(), 1);

    db.remove_client_own_attribs_for_peer(&PEER_A).unwrap();
    assert!(db.store().dynamic_record_ids().is_empty());
    assert!(!db.has_client_own_values(&PEER_A));
    assert_eq!(read(&mut db, PEER_A, id.start_handle() + 3), CCC_OFF.to_vec());

    db.flush().unwrap();
    let db = GattDatabase::open(db.close(), RADIO, None).unwrap();
    assert!(!db.has_client_own_values(&PEER_A));
}

#[test]
fn test_bond_removal_is_atomic() {
    let mut db = GattDatabase::open(FlakyStore::default(), RADIO, None).unwrap();
    let id = db.allocate_service(&ServiceParms::primary(0x180Du16, 2)).unwrap();
    db.add_dynamic(
        id,
        1,
        &DynamicAttr::new(CLIENT_CHAR_CONFIG_UUID, AttPermissions::READWRITEABLE, DynamicValue::ccc()),
    )
    .unwrap();
    db.add_service(id).unwrap();
    db.peer_connected(&PEER_A, true).unwrap();
    db.write_attribute(&open_link(PEER_A), id.start_handle() + 1, 0, &CCC_ON)
        .unwrap();
    db.flush().unwrap();

    let mut store = db.close();
    store.refuse_remove = true;
    let mut db = GattDatabase::open(store, RADIO, None).unwrap();
    assert!(matches!(
        db.remove_client_own_attribs_for_peer(&PEER_A),
        Err(DbError::Persistence(_))
    ));
    assert_eq!(
        db.get_client_own_inst_value(id, 1, &PEER_A).unwrap(),
        CoiValue::Ccc(ClientCharConfig::NOTIFICATION)
    );
}

#[test]
fn test_failed_root_write_leaves_no_group_record() {
    let mut db = GattDatabase::open(FlakyStore::default(), RADIO, None).unwrap();
    let id = db.allocate_service(&ServiceParms::primary(0x180Du16, 2)).unwrap();
    db.add_dynamic(
        id,
        1,
        &DynamicAttr::new(CLIENT_CHAR_CONFIG_UUID, AttPermissions::READWRITEABLE, DynamicValue::ccc()),
    )
    .unwrap();
    db.add_service(id).unwrap();
    db.peer_connected(&PEER_A, true).unwrap();
    db.write_attribute(&open_link(PEER_A), id.start_handle() + 1, 0, &CCC_ON)
        .unwrap();

    db.store.refuse_root_write = true;
    assert!(matches!(db.flush(), Err(DbError::Persistence(_))));
    assert!(db.is_dirty());
    assert!(db.store().inner.dynamic_record_ids().is_empty());
    assert!(!db.store().inner.contains(1));

    db.store.refuse_root_write = false;
    db.flush().unwrap();
    assert_eq!(db.store().inner.dynamic_record_ids().len(), 1);

    let db = GattDatabase::open(db.close(), RADIO, None).unwrap();
    assert_eq!(
        db.get_client_own_inst_value(id, 1, &PEER_A).unwrap(),
        CoiValue::Ccc(ClientCharConfig::NOTIFICATION)
    );
}

#[test]
fn test_emptied_group_record_removed_on_flush() {
    let mut db = open_db();
    let id = build_service(&mut db);
    db.add_service(id).unwrap();
    db.peer_connected(&PEER_A, true).unwrap();
    db.write_attribute(&open_link(PEER_A), id.start_handle() + 3, 0, &CCC_ON)
        .unwrap();
    db.flush().unwrap();
    db.peer_disconnected(&PEER_A);

    db.inactivate_service(id).unwrap();
    db.remove_service(id).unwrap();
    db.flush().unwrap();
    assert!(db.store().dynamic_record_ids().is_empty());
}

#[test]
fn test_handler_supplies_read_value() {
    let mut db = open_db();
    let id = single_attr_service(
        &mut db,
        DynamicAttr::new(
            0x2A29u16,
            AttPermissions::READWRITEABLE,
            DynamicValue::StoredServApp {
                len: 0,
                max: 8,
                fixed: false,
            },
        ),
    );
    let handle = id.start_handle() + 1;
    assert_eq!(
        db.read_attribute(&open_link(PEER_A), handle, 0),
        Err(AttErrorCode::Unlikely)
    );
    assert_eq!(db.pending_requests(), 0);

    let (handler, events) = recorder();
    assert!(db.set_service_handler(id, Some(handler)).unwrap().is_none());

    let token = match db.read_attribute(&open_link(PEER_A), handle, 2) {
        Ok(ReadOutcome::Pending(token)) => token,
        other => panic!("unexpected read outcome {:?}", other),
    };
    assert_eq!(
        events.lock().unwrap().as_slice(),
        &[ServerEvent::ReadValueRequest {
            token,
            peer: PEER_A,
            service: id,
            index: 1,
            handle,
            offset: 2,
        }]
    );

    assert_eq!(
        db.provide_read_value(token, Ok(vec![0; 9])),
        Err(DbError::InvalidLength { len: 9, max: 8 })
    );
    assert_eq!(db.pending_requests(), 1);
    assert_eq!(
        db.provide_write_response(token, Ok(())),
        Err(DbError::RequestMismatch(token.value()))
    );

    let completion = db.provide_read_value(token, Ok(b"abcdef".to_vec())).unwrap();
    assert_eq!(
        completion,
        Completion {
            peer: PEER_A,
            handle,
            response: Ok(Response::Read(b"cdef".to_vec())),
        }
    );
    assert_eq!(db.pending_requests(), 0);
    assert_eq!(
        db.provide_read_value(token, Ok(Vec::new())),
        Err(DbError::UnknownRequest(token.value()))
    );
}

#[test]
fn test_handler_owned_write() {
    let mut db = open_db();
    let id = single_attr_service(
        &mut db,
        DynamicAttr::new(
            0x2A29u16,
            AttPermissions::READWRITEABLE,
            DynamicValue::StoredServApp {
                len: 0,
                max: 8,
                fixed: false,
            },
        ),
    );
    let (handler, events) = recorder();
    db.set_service_handler(id, Some(handler)).unwrap();
    let handle = id.start_handle() + 1;

    let token = match db.write_attribute(&open_link(PEER_A), handle, 0, b"abc") {
        Ok(WriteOutcome::Pending(token)) => token,
        other => panic!("unexpected write outcome {:?}", other),
    };
    assert_eq!(events.lock().unwrap().len(), 1);

    let completion = db.provide_write_response(token, Ok(())).unwrap();
    assert_eq!(completion.response, Ok(Response::Write));
    assert_eq!(
        db.get_attrib_value(id, 1).unwrap().value,
        AttValue::StoredServApp {
            len: 3,
            max: 8,
            fixed: false,
        }
    );
}

#[test]
fn test_check_write() {
    let mut db = open_db();
    let id = single_attr_service(
        &mut db,
        DynamicAttr::new(0x2A06u16, AttPermissions::READWRITEABLE, DynamicValue::V8(0))
            .check_write(),
    );
    let handle = id.start_handle() + 1;
    let link = open_link(PEER_A);

    // Without a handler the write goes straight through
    assert_eq!(
        db.write_attribute(&link, handle, 0, &[1]),
        Ok(WriteOutcome::Complete)
    );
    assert_eq!(read(&mut db, PEER_A, handle), vec![1]);

    let (handler, events) = recorder();
    db.set_service_handler(id, Some(handler)).unwrap();

    let rejected = match db.write_attribute(&link, handle, 0, &[2]) {
        Ok(WriteOutcome::Pending(token)) => token,
        other => panic!("unexpected write outcome {:?}", other),
    };
    let completion = db
        .provide_write_response(rejected, Err(AttErrorCode::ApplicationError(0x90)))
        .unwrap();
    assert_eq!(completion.response, Err(AttErrorCode::ApplicationError(0x90)));
    assert_eq!(read(&mut db, PEER_A, handle), vec![1]);

    let accepted = match db.write_attribute(&link, handle, 0, &[3]) {
        Ok(WriteOutcome::Pending(token)) => token,
        other => panic!("unexpected write outcome {:?}", other),
    };
    assert_eq!(read(&mut db, PEER_A, handle), vec![1]);
    let completion = db.provide_write_response(accepted, Ok(())).unwrap();
    assert_eq!(completion.handle, handle);
    assert_eq!(completion.response, Ok(Response::Write));
    assert_eq!(read(&mut db, PEER_A, handle), vec![3]);

    assert!(matches!(
        events.lock().unwrap().last(),
        Some(ServerEvent::CheckWriteRequest { data, .. }) if data == &vec![3]
    ));
    assert_eq!(
        db.write_attribute(&link, handle, 0, &[1, 2]),
        Err(AttErrorCode::InvalidAttributeValueLength)
    );
}

#[test]
fn test_disconnect_drops_pending_requests() {
    let mut db = open_db();
    let id = single_attr_service(
        &mut db,
        DynamicAttr::new(
            0x2A29u16,
            AttPermissions::READABLE,
            DynamicValue::StoredServApp {
                len: 4,
                max: 4,
                fixed: true,
            },
        ),
    );
    let (handler, _events) = recorder();
    db.set_service_handler(id, Some(handler)).unwrap();
    db.peer_connected(&PEER_A, false).unwrap();

    let token = match db.read_attribute(&open_link(PEER_A), id.start_handle() + 1, 0) {
        Ok(ReadOutcome::Pending(token)) => token,
        other => panic!("unexpected read outcome {:?}", other),
    };
    db.peer_disconnected(&PEER_A);
    assert_eq!(db.pending_requests(), 0);
    assert_eq!(
        db.provide_read_value(token, Ok(vec![0; 4])),
        Err(DbError::UnknownRequest(token.value()))
    );
}

#[test]
fn test_enum_write_out_of_range() {
    let mut db = open_db();
    let id = single_attr_service(
        &mut db,
        DynamicAttr::new(
            0x2A19u16,
            AttPermissions::READWRITEABLE,
            DynamicValue::Enum8 {
                value: 1,
                min: 0,
                max: 3,
            },
        ),
    );
    let handle = id.start_handle() + 1;
    let link = open_link(PEER_A);

    assert_eq!(
        db.write_attribute(&link, handle, 0, &[4]),
        Err(AttErrorCode::ApplicationError(0x80))
    );
    assert_eq!(read(&mut db, PEER_A, handle), vec![1]);
    db.write_attribute(&link, handle, 0, &[2]).unwrap();
    assert_eq!(read(&mut db, PEER_A, handle), vec![2]);
    assert_eq!(
        db.write_attribute(&link, handle, 1, &[2]),
        Err(AttErrorCode::AttributeNotLong)
    );
}

#[test]
fn test_alerts_follow_committed_access() {
    let mut db = open_db();
    let id = single_attr_service(
        &mut db,
        DynamicAttr::new(0x2A2Bu16, AttPermissions::READWRITEABLE, DynamicValue::V32(0))
            .alert_on_read()
            .alert_on_write(),
    );
    let (handler, events) = recorder();
    db.set_service_handler(id, Some(handler)).unwrap();
    let handle = id.start_handle() + 1;
    let link = open_link(PEER_B);

    db.write_attribute(&link, handle, 0, &[1, 2, 3, 4]).unwrap();
    assert_eq!(read(&mut db, PEER_B, handle), vec![1, 2, 3, 4]);
    assert!(db.write_attribute(&link, handle, 0, &[1]).is_err());

    let events = events.lock().unwrap();
    assert_eq!(
        events.as_slice(),
        &[
            ServerEvent::WriteAlert {
                peer: PEER_B,
                service: id,
                index: 1,
                handle,
                offset: 0,
                data: vec![1, 2, 3, 4],
            },
            ServerEvent::ReadAlert {
                peer: PEER_B,
                service: id,
                index: 1,
                handle,
            },
        ]
    );
}

#[test]
fn test_shared_database_across_threads() {
    let shared = SharedGattDatabase::new(open_db());
    let worker = shared.clone();
    let id = std::thread::spawn(move || {
        worker.with(|db| db.allocate_service(&ServiceParms::primary(0x180Fu16, 2)))
    })
    .join()
    .unwrap()
    .unwrap()
    .unwrap();

    assert!(shared.lock().unwrap().get_service(id.start_handle()).is_some());
    let db = match shared.try_unwrap() {
        Ok(db) => db,
        Err(_) => panic!("database still shared"),
    };
    assert_eq!(db.local_address(), RADIO);
}
