//! Service handler events and suspended remote requests
//!
//! Reads of values owned by the service handler, and writes that the handler
//! must approve first, cannot finish inside the call that started them. They
//! are parked under a [`RequestToken`] and the handler resumes them later with
//! [`GattDatabase::provide_read_value`] or
//! [`GattDatabase::provide_write_response`].

use super::remote::WritePlan;
use super::service::ServiceId;
use super::value::StoredValue;
use super::GattDatabase;
use crate::att::{AttErrorCode, AttFlags};
use crate::error::{DbError, DbResult};
use crate::gap::DevAddr;
use crate::persist::PersistenceManager;
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Identifies one suspended remote request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u32);

impl RequestToken {
    pub fn value(&self) -> u32 {
        self.0
    }
}

/// Events delivered to a service handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A remote read of an `ALERT_ON_READ` attribute completed
    ReadAlert {
        peer: DevAddr,
        service: ServiceId,
        index: u16,
        handle: u16,
    },
    /// A remote write to an `ALERT_ON_WRITE` attribute was committed
    WriteAlert {
        peer: DevAddr,
        service: ServiceId,
        index: u16,
        handle: u16,
        offset: u16,
        data: Vec<u8>,
    },
    /// The handler must supply the value with `provide_read_value`
    ReadValueRequest {
        token: RequestToken,
        peer: DevAddr,
        service: ServiceId,
        index: u16,
        handle: u16,
        offset: u16,
    },
    /// The handler must accept or reject the write with
    /// `provide_write_response`
    CheckWriteRequest {
        token: RequestToken,
        peer: DevAddr,
        service: ServiceId,
        index: u16,
        handle: u16,
        offset: u16,
        data: Vec<u8>,
    },
}

/// Callback registered per service. It runs while the database is borrowed
/// and must not call back into it; suspended requests are resumed later.
pub type ServiceHandler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// Result of a suspended request, to be sent to the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Read(Vec<u8>),
    Write,
}

/// A resumed request ready for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub peer: DevAddr,
    pub handle: u16,
    pub response: Result<Response, AttErrorCode>,
}

#[derive(Debug, Clone)]
pub(crate) enum PendingKind {
    Read { offset: u16 },
    Write { offset: u16, data: Vec<u8> },
}

#[derive(Debug, Clone)]
pub(crate) struct PendingRequest {
    pub peer: DevAddr,
    pub start_handle: u16,
    pub index: u16,
    pub kind: PendingKind,
}

impl PendingRequest {
    fn handle(&self) -> u16 {
        self.start_handle + self.index
    }
}

/// Outstanding requests keyed by token
#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    next_token: u32,
    requests: BTreeMap<RequestToken, PendingRequest>,
}

impl PendingRequests {
    pub fn insert(&mut self, request: PendingRequest) -> RequestToken {
        loop {
            self.next_token = self.next_token.wrapping_add(1);
            let token = RequestToken(self.next_token);
            if self.next_token != 0 && !self.requests.contains_key(&token) {
                self.requests.insert(token, request);
                return token;
            }
        }
    }

    pub fn get(&self, token: RequestToken) -> Option<&PendingRequest> {
        self.requests.get(&token)
    }

    pub fn remove(&mut self, token: RequestToken) -> Option<PendingRequest> {
        self.requests.remove(&token)
    }

    /// Drop requests matching `pred`, returning how many went away
    pub fn drop_where(&mut self, pred: impl Fn(&PendingRequest) -> bool) -> usize {
        let before = self.requests.len();
        self.requests.retain(|_, request| !pred(request));
        before - self.requests.len()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }
}

impl<P: PersistenceManager> GattDatabase<P> {
    /// Number of suspended requests
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Resume a suspended read of a handler owned value.
    ///
    /// `value` is the complete attribute value; the offset of the suspended
    /// request is applied here. A value longer than the attribute's maximum
    /// is rejected and the request stays pending.
    pub fn provide_read_value(
        &mut self,
        token: RequestToken,
        value: Result<Vec<u8>, AttErrorCode>,
    ) -> DbResult<Completion> {
        let request = self
            .pending
            .get(token)
            .ok_or(DbError::UnknownRequest(token.value()))?;
        let offset = match request.kind {
            PendingKind::Read { offset } => offset,
            PendingKind::Write { .. } => return Err(DbError::RequestMismatch(token.value())),
        };

        let response = match value {
            Ok(data) => {
                let attr = self.attribute(ServiceId(request.start_handle), request.index)?;
                let max = match attr.value {
                    StoredValue::StoredServApp { max, .. } => max,
                    _ => return Err(DbError::RequestMismatch(token.value())),
                };
                if data.len() > max as usize {
                    return Err(DbError::InvalidLength {
                        len: data.len(),
                        max,
                    });
                }
                if offset as usize > data.len() {
                    Err(AttErrorCode::InvalidOffset)
                } else {
                    Ok(Response::Read(data[offset as usize..].to_vec()))
                }
            }
            Err(code) => Err(code),
        };

        let request = self
            .pending
            .remove(token)
            .ok_or(DbError::UnknownRequest(token.value()))?;
        debug!("Read request {} resumed for {}", token.value(), request.peer);

        Ok(Completion {
            peer: request.peer,
            handle: request.handle(),
            response,
        })
    }

    /// Resume a suspended write with the handler's verdict. An accepted
    /// write is committed before the completion is returned.
    pub fn provide_write_response(
        &mut self,
        token: RequestToken,
        verdict: Result<(), AttErrorCode>,
    ) -> DbResult<Completion> {
        match self.pending.get(token) {
            None => return Err(DbError::UnknownRequest(token.value())),
            Some(PendingRequest {
                kind: PendingKind::Read { .. },
                ..
            }) => return Err(DbError::RequestMismatch(token.value())),
            Some(_) => {}
        }
        let request = self
            .pending
            .remove(token)
            .ok_or(DbError::UnknownRequest(token.value()))?;
        let (offset, data) = match request.kind {
            PendingKind::Write { offset, data } => (offset, data),
            PendingKind::Read { .. } => return Err(DbError::RequestMismatch(token.value())),
        };
        debug!("Write request {} resumed for {}", token.value(), request.peer);

        let handle = request.start_handle + request.index;
        let response = match verdict {
            Ok(()) => self
                .commit_suspended_write(request.peer, request.start_handle, request.index, offset, &data)
                .map(|_| Response::Write),
            Err(code) => Err(code),
        };

        Ok(Completion {
            peer: request.peer,
            handle,
            response,
        })
    }

    fn commit_suspended_write(
        &mut self,
        peer: DevAddr,
        start_handle: u16,
        index: u16,
        offset: u16,
        data: &[u8],
    ) -> Result<(), AttErrorCode> {
        let id = ServiceId(start_handle);
        let attr = self
            .attribute(id, index)
            .map_err(|_| AttErrorCode::InvalidHandle)?;
        let plan = self.plan_write(start_handle, index, &attr, peer, offset, data)?;
        let owned_by_handler = matches!(plan, WritePlan::ServApp(_));
        self.apply_write(peer, start_handle, index, plan)?;

        if !owned_by_handler && attr.flags.contains(AttFlags::ALERT_ON_WRITE) {
            self.notify_handler(
                id,
                &ServerEvent::WriteAlert {
                    peer,
                    service: id,
                    index,
                    handle: start_handle + index,
                    offset,
                    data: data.to_vec(),
                },
            );
        }
        Ok(())
    }

    /// Deliver `event` to the handler of service `id`, if one is set
    pub(crate) fn notify_handler(&self, id: ServiceId, event: &ServerEvent) -> bool {
        match self.services.get(&id.0).and_then(|s| s.handler.clone()) {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }
}
