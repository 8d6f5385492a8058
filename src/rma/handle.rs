//! Non-blocking one-sided operations and their completion.
//!
//! A [Handle] owns the transport requests of one chunked transfer (at most a bulk request and a
//! remainder request). It is completed exactly once, either on its own ([Handle::wait],
//! [Handle::wait_local], [Handle::test_local], or by awaiting it) or together with other handles
//! ([wait_all], [wait_all_local], [test_all_local]). A completed handle becomes the null handle,
//! for which every completion call is a no-op.
use super::chunk::ChunkPlan;
use crate::lamellae::{
    Comm, CommProgress, CommRdma, CommRequest, Completion, FabricError, RemoteAddr, RequestId,
    RmaResult, Window,
};
use crate::warnings::RuntimeWarning;

use futures::future::FusedFuture;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::trace;

struct Request<'a> {
    id: RequestId,
    /// where a get delivers its data
    sink: Option<&'a mut [u8]>,
}

impl Request<'_> {
    fn deliver(self, completion: Completion) -> RmaResult<()> {
        if let (Some(sink), Some(data)) = (self.sink, completion) {
            if sink.len() != data.len() {
                return Err(FabricError::BufferSize {
                    expected: sink.len(),
                    actual: data.len(),
                }
                .into());
            }
            sink.copy_from_slice(&data);
        }
        Ok(())
    }
}

/// Inline list of the bulk and remainder requests of a transfer.
#[derive(Default)]
struct RequestList<'a> {
    slots: [Option<Request<'a>>; 2],
}

impl<'a> RequestList<'a> {
    fn ids(&self) -> impl Iterator<Item = RequestId> + '_ {
        self.slots.iter().flatten().map(|req| req.id)
    }

    fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand the completions, in request order, to their requests and empty the list.
    fn deliver(&mut self, completions: impl IntoIterator<Item = Completion>) -> RmaResult<()> {
        let mut completions = completions.into_iter();
        for slot in self.slots.iter_mut() {
            if let Some(req) = slot.take() {
                req.deliver(completions.next().flatten())?;
            }
        }
        Ok(())
    }

    fn free(&mut self, comm: &Comm) {
        for req in self.slots.iter_mut().filter_map(Option::take) {
            comm.free_request(req.id);
        }
    }
}

struct HandleInner<'a> {
    comm: Arc<Comm>,
    target: usize,
    window: Window,
    needs_flush: bool,
    requests: RequestList<'a>,
}

impl HandleInner<'_> {
    fn wait_requests(&mut self) -> RmaResult<()> {
        let ids = self.requests.ids().collect::<Vec<_>>();
        if ids.is_empty() {
            return Ok(());
        }
        let completions = self.comm.wait_all(&ids)?;
        self.requests.deliver(completions)
    }

    fn test_requests(&mut self) -> RmaResult<bool> {
        let ids = self.requests.ids().collect::<Vec<_>>();
        if ids.is_empty() {
            return Ok(true);
        }
        match self.comm.test_all(&ids)? {
            Some(completions) => {
                self.requests.deliver(completions)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn flush_remote(&self) -> RmaResult<()> {
        if self.needs_flush {
            trace!("remote completion to rank {} {:?}", self.target, self.window);
            self.comm.flush(self.target, self.window)?;
        }
        Ok(())
    }
}

impl Drop for HandleInner<'_> {
    fn drop(&mut self) {
        if !self.requests.is_empty() {
            RuntimeWarning::DroppedHandle("a non-blocking operation handle").print();
            self.requests.free(&self.comm);
        }
    }
}

#[must_use]
/// Handle of a non-blocking get or put.
///
/// For a get the handle borrows the destination buffer, which holds the fetched data once the
/// handle has completed locally. For a put the source buffer may be reused after local completion,
/// but other units are only guaranteed to observe the write after remote completion
/// ([Handle::wait], [wait_all], or a flush of the target).
///
/// Transfers that never touch the transport (the calling unit's own memory, a shared-memory peer,
/// or zero elements) return the null handle.
///
/// Dropping a handle whose requests are still in flight releases them and prints a warning.
pub struct Handle<'a> {
    inner: Option<HandleInner<'a>>,
    marker: PhantomData<&'a mut [u8]>,
}

impl std::fmt::Debug for Handle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(inner) => write!(
                f,
                "Handle {{ target: {}, window: {:?}, requests: {}, needs_flush: {} }}",
                inner.target,
                inner.window,
                inner.requests.len(),
                inner.needs_flush
            ),
            None => write!(f, "Handle {{ null }}"),
        }
    }
}

impl Default for Handle<'_> {
    fn default() -> Self {
        Handle::null()
    }
}

impl<'a> Handle<'a> {
    /// The already completed handle.
    pub fn null() -> Handle<'a> {
        Handle {
            inner: None,
            marker: PhantomData,
        }
    }

    fn from_requests(
        comm: &Arc<Comm>,
        addr: RemoteAddr,
        needs_flush: bool,
        requests: RequestList<'a>,
    ) -> Handle<'a> {
        if requests.is_empty() {
            return Handle::null();
        }
        Handle {
            inner: Some(HandleInner {
                comm: comm.clone(),
                target: addr.rank,
                window: addr.window,
                needs_flush,
                requests,
            }),
            marker: PhantomData,
        }
    }

    pub fn is_null(&self) -> bool {
        self.inner.is_none()
    }

    /// Whether completing this handle includes a remote-completion step.
    pub fn needs_flush(&self) -> bool {
        self.inner.as_ref().is_some_and(|inner| inner.needs_flush)
    }

    /// Number of transport requests still in flight.
    pub fn num_requests(&self) -> usize {
        self.inner
            .as_ref()
            .map_or(0, |inner| inner.requests.len())
    }

    /// Block until the operation completed locally and, for puts, remotely, then release the
    /// handle.
    pub fn wait(&mut self) -> RmaResult<()> {
        self.complete(true)
    }

    /// Block until the operation completed locally, then release the handle.
    ///
    /// A put is not guaranteed to be visible to other units afterwards.
    pub fn wait_local(&mut self) -> RmaResult<()> {
        self.complete(false)
    }

    /// Poll for local completion, releasing the handle and returning `true` once it completed.
    pub fn test_local(&mut self) -> RmaResult<bool> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(true);
        };
        if inner.test_requests()? {
            self.inner = None;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn complete(&mut self, remote: bool) -> RmaResult<()> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(());
        };
        inner.wait_requests()?;
        if remote {
            inner.flush_remote()?;
        }
        self.inner = None;
        Ok(())
    }

    fn release(&mut self) {
        self.inner = None;
    }
}

impl Future for Handle<'_> {
    type Output = RmaResult<()>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        match inner.test_requests() {
            Ok(true) => {}
            Ok(false) => {
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
            Err(err) => return Poll::Ready(Err(err)),
        }
        if let Err(err) = inner.flush_remote() {
            return Poll::Ready(Err(err));
        }
        this.inner = None;
        Poll::Ready(Ok(()))
    }
}

impl FusedFuture for Handle<'_> {
    fn is_terminated(&self) -> bool {
        self.inner.is_none()
    }
}

/// Issue the request based gets of `plan`, each delivering into its part of `dst`.
pub(crate) fn issue_get<'a>(
    comm: &Arc<Comm>,
    addr: RemoteAddr,
    plan: &ChunkPlan,
    dst: &'a mut [u8],
) -> RmaResult<Handle<'a>> {
    plan.check_target(comm, addr)?;
    let mut rest = dst;
    let mut requests = RequestList::default();
    for (i, piece) in plan.slots().into_iter().enumerate() {
        let Some(piece) = piece else { continue };
        let (sink, tail) = std::mem::take(&mut rest).split_at_mut(piece.len);
        rest = tail;
        let issued = addr
            .byte_add(piece.offset)
            .and_then(|at| comm.rget(at, piece.wire, piece.count));
        match issued {
            Ok(id) => {
                requests.slots[i] = Some(Request {
                    id,
                    sink: Some(sink),
                })
            }
            Err(err) => {
                requests.free(comm);
                return Err(err.into());
            }
        }
    }
    Ok(Handle::from_requests(comm, addr, false, requests))
}

/// Issue the request based puts of `plan` from the matching parts of `src`.
pub(crate) fn issue_put<'a>(
    comm: &Arc<Comm>,
    addr: RemoteAddr,
    plan: &ChunkPlan,
    src: &'a [u8],
) -> RmaResult<Handle<'a>> {
    plan.check_target(comm, addr)?;
    let mut requests = RequestList::default();
    for (i, piece) in plan.slots().into_iter().enumerate() {
        let Some(piece) = piece else { continue };
        let data = &src[piece.offset..piece.offset + piece.len];
        let issued = addr
            .byte_add(piece.offset)
            .and_then(|at| comm.rput(at, data, piece.wire, piece.count));
        match issued {
            Ok(id) => requests.slots[i] = Some(Request { id, sink: None }),
            Err(err) => {
                requests.free(comm);
                return Err(err.into());
            }
        }
    }
    Ok(Handle::from_requests(comm, addr, true, requests))
}

/// Handles grouped by the endpoint that issued them.
fn endpoints(handles: &[Handle<'_>]) -> Vec<(Arc<Comm>, Vec<usize>)> {
    let mut groups: Vec<(Arc<Comm>, Vec<usize>)> = Vec::new();
    for (i, handle) in handles.iter().enumerate() {
        let Some(inner) = &handle.inner else { continue };
        match groups
            .iter_mut()
            .find(|(comm, _)| Arc::ptr_eq(comm, &inner.comm))
        {
            Some((_, members)) => members.push(i),
            None => groups.push((inner.comm.clone(), vec![i])),
        }
    }
    groups
}

fn collect_ids(handles: &[Handle<'_>], members: &[usize]) -> Vec<RequestId> {
    members
        .iter()
        .filter_map(|i| handles[*i].inner.as_ref())
        .flat_map(|inner| inner.requests.ids())
        .collect()
}

fn distribute(
    handles: &mut [Handle<'_>],
    members: &[usize],
    completions: Vec<Completion>,
) -> RmaResult<()> {
    let mut completions = completions.into_iter();
    for i in members {
        if let Some(inner) = handles[*i].inner.as_mut() {
            let n = inner.requests.len();
            inner.requests.deliver(completions.by_ref().take(n))?;
        }
    }
    Ok(())
}

fn complete_all(handles: &mut [Handle<'_>], remote: bool) -> RmaResult<()> {
    for (comm, members) in endpoints(handles) {
        let ids = collect_ids(handles, &members);
        trace!(
            "combined wait on {} requests of {} handles",
            ids.len(),
            members.len()
        );
        if !ids.is_empty() {
            let completions = comm.wait_all(&ids)?;
            distribute(handles, &members, completions)?;
        }
        if remote {
            for i in &members {
                if let Some(inner) = &handles[*i].inner {
                    inner.flush_remote()?;
                }
            }
        }
    }
    handles.iter_mut().for_each(Handle::release);
    Ok(())
}

/// Complete every handle with one combined wait, then perform the remote-completion step of
/// every handle that needs one. Every handle is released, null handles included.
pub fn wait_all(handles: &mut [Handle<'_>]) -> RmaResult<()> {
    complete_all(handles, true)
}

/// Like [wait_all] without any remote-completion step.
pub fn wait_all_local(handles: &mut [Handle<'_>]) -> RmaResult<()> {
    complete_all(handles, false)
}

/// Poll all handles at once.
///
/// Returns `true` and releases every handle if all of them completed locally, otherwise returns
/// `false` and no handle is touched. Handles of different endpoints are polled alike, nothing is
/// delivered until every endpoint reports completion.
pub fn test_all_local(handles: &mut [Handle<'_>]) -> RmaResult<bool> {
    let mut ready = true;
    for (comm, members) in endpoints(handles) {
        let ids = collect_ids(handles, &members);
        ready &= comm.poll_all(&ids)?;
    }
    if !ready {
        return Ok(false);
    }
    complete_all(handles, false)?;
    Ok(true)
}
