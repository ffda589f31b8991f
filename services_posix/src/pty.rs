//! Pseudo-terminal pairs
//!
//! Opening `/dev/ptmx` creates a master and a slave joined by two unbuffered
//! pipes: whatever the master writes the slave reads, and the other way
//! round. The slave is published at `/dev/pts/<n>` and starts locked until
//! the master unlocks it. Line discipline is left to the terminal's user.

use crate::context::ServerContext;
use crate::error::ServerError;
use crate::pipe::Pipe;
use crate::registry::ResourceRef;
use crate::request::Request;
use crate::resource::{DeviceControl, Handled, Openable, Resource, Stream};
use ipc::{DevCtl, ErrorCode, OpenFlags, Reply};
use services_logger::LogEntry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct PtyState {
    master_open: bool,
    slave_locked: bool,
    slave_open: bool,
}

/// State both ends of one pair share
struct PtyShared {
    /// Master writes, slave reads
    to_slave: ResourceRef,
    /// Slave writes, master reads
    to_master: ResourceRef,
    state: Mutex<PtyState>,
}

impl PtyShared {
    fn lock(&self) -> MutexGuard<'_, PtyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Direction {
    Read,
    Write,
}

/// Forwards a read or write to one of the pair's pipes
fn forward(cx: &ServerContext, pipe: &ResourceRef, direction: Direction, rq: Request) -> Handled {
    match pipe.resource() {
        Resource::Pipe(inner) => match direction {
            Direction::Read => inner.read(cx, pipe, rq),
            Direction::Write => inner.write(cx, pipe, rq),
        },
        _ => Handled::Reply(rq, Reply::error(ErrorCode::BrokenPipe)),
    }
}

/// `/dev/ptmx`
pub struct PtyMultiplexer;

impl PtyMultiplexer {
    fn new_pipe(cx: &ServerContext) -> Result<ResourceRef, ServerError> {
        cx.registry()
            .create(|_| Resource::Pipe(Pipe::new(None, OpenFlags::read_write())))
    }

    fn discard(cx: &ServerContext, handles: &[&ResourceRef]) {
        for handle in handles {
            cx.registry().mark_destroyed(handle);
        }
    }

    /// Creates a master/slave pair and publishes the slave
    fn create_pair(cx: &ServerContext) -> Result<ResourceRef, ServerError> {
        let to_slave = Self::new_pipe(cx)?;
        let to_master = match Self::new_pipe(cx) {
            Ok(pipe) => pipe,
            Err(err) => {
                Self::discard(cx, &[&to_slave]);
                return Err(err);
            }
        };

        let pipes = [to_slave.clone(), to_master.clone()];
        let shared = Arc::new(PtyShared {
            to_slave,
            to_master,
            state: Mutex::new(PtyState {
                master_open: true,
                slave_locked: true,
                slave_open: false,
            }),
        });

        let slave = match cx.registry().create(|_| {
            Resource::PtySlave(PtySlave {
                shared: shared.clone(),
            })
        }) {
            Ok(slave) => slave,
            Err(err) => {
                Self::discard(cx, &[&pipes[0], &pipes[1]]);
                return Err(err);
            }
        };

        let slave_path = format!("/dev/pts/{}", slave.id().index());
        let master = match cx.registry().create(|_| {
            Resource::PtyMaster(PtyMaster {
                shared,
                slave: slave.clone(),
                slave_path: slave_path.clone(),
            })
        }) {
            Ok(master) => master,
            Err(err) => {
                Self::discard(cx, &[&slave, &pipes[0], &pipes[1]]);
                return Err(err);
            }
        };

        if let Err(err) = cx.namespace().link(&slave_path, cx.oid(slave.id())) {
            Self::discard(cx, &[&master, &slave, &pipes[0], &pipes[1]]);
            return Err(err.into());
        }

        cx.log().log(
            LogEntry::info("pty pair created")
                .with_field("master", master.id())
                .with_field("slave", slave_path),
        );
        Ok(master)
    }
}

impl Openable for PtyMultiplexer {
    fn open(&self, cx: &ServerContext, _this: &ResourceRef, _flags: OpenFlags, rq: Request)
        -> Handled
    {
        let created = Self::create_pair(cx).map(|master| Reply::object(cx.oid(master.id())));
        Handled::result(rq, created)
    }

    fn close(&self, _cx: &ServerContext, _this: &ResourceRef, _flags: OpenFlags, rq: Request)
        -> Handled
    {
        Handled::Reply(rq, Reply::ok(0))
    }
}

/// Controlling end of a pair
pub struct PtyMaster {
    shared: Arc<PtyShared>,
    slave: ResourceRef,
    slave_path: String,
}

impl PtyMaster {
    /// Where the slave is published
    pub fn slave_path(&self) -> &str {
        &self.slave_path
    }
}

impl Stream for PtyMaster {
    fn read(&self, cx: &ServerContext, _this: &ResourceRef, rq: Request) -> Handled {
        forward(cx, &self.shared.to_master, Direction::Read, rq)
    }

    fn write(&self, cx: &ServerContext, _this: &ResourceRef, rq: Request) -> Handled {
        forward(cx, &self.shared.to_slave, Direction::Write, rq)
    }
}

impl Openable for PtyMaster {
    fn open(&self, _cx: &ServerContext, _this: &ResourceRef, _flags: OpenFlags, rq: Request)
        -> Handled
    {
        Handled::Reply(rq, Reply::ok(0))
    }

    /// Unpublishes the slave and destroys the whole pair
    fn close(&self, cx: &ServerContext, this: &ResourceRef, _flags: OpenFlags, rq: Request)
        -> Handled
    {
        self.shared.lock().master_open = false;

        if let Err(err) = cx.namespace().unlink(&self.slave_path) {
            cx.log().log(
                LogEntry::warn("pty slave already unlinked")
                    .with_field("path", &self.slave_path)
                    .with_field("error", err),
            );
        }

        let registry = cx.registry();
        registry.mark_destroyed(this);
        registry.mark_destroyed(&self.slave);
        registry.mark_destroyed(&self.shared.to_slave);
        registry.mark_destroyed(&self.shared.to_master);
        Handled::Reply(rq, Reply::ok(0))
    }
}

impl DeviceControl for PtyMaster {
    fn devctl(&self, _cx: &ServerContext, _this: &ResourceRef, ctl: DevCtl)
        -> Result<(), ServerError>
    {
        match ctl {
            DevCtl::Unlock => {
                let mut state = self.shared.lock();
                if !state.slave_locked {
                    return Err(ServerError::InvalidArgument(
                        "pty slave is not locked".to_string(),
                    ));
                }
                state.slave_locked = false;
                Ok(())
            }
        }
    }
}

/// Terminal end of a pair
pub struct PtySlave {
    shared: Arc<PtyShared>,
}

impl Stream for PtySlave {
    fn read(&self, cx: &ServerContext, _this: &ResourceRef, rq: Request) -> Handled {
        forward(cx, &self.shared.to_slave, Direction::Read, rq)
    }

    fn write(&self, cx: &ServerContext, _this: &ResourceRef, rq: Request) -> Handled {
        forward(cx, &self.shared.to_master, Direction::Write, rq)
    }
}

impl Openable for PtySlave {
    fn open(&self, _cx: &ServerContext, _this: &ResourceRef, _flags: OpenFlags, rq: Request)
        -> Handled
    {
        let mut state = self.shared.lock();
        let result = if state.slave_locked || state.slave_open || !state.master_open {
            Err(ServerError::PermissionDenied(format!("pty slave {:?}", *state)))
        } else {
            state.slave_open = true;
            Ok(Reply::ok(0))
        };
        drop(state);
        Handled::result(rq, result)
    }

    fn close(&self, _cx: &ServerContext, _this: &ResourceRef, _flags: OpenFlags, rq: Request)
        -> Handled
    {
        let mut state = self.shared.lock();
        let result = if state.slave_open {
            state.slave_open = false;
            Ok(Reply::ok(0))
        } else {
            Err(ServerError::PermissionDenied("pty slave is not open".to_string()))
        };
        drop(state);
        Handled::result(rq, result)
    }
}

impl DeviceControl for PtySlave {
    fn devctl(&self, _cx: &ServerContext, _this: &ResourceRef, _ctl: DevCtl)
        -> Result<(), ServerError>
    {
        Ok(())
    }
}
