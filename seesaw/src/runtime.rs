// Copyright 2026 seesaw Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{fmt::Debug, future::Future, mem::ManuallyDrop, ops::Deref, sync::Arc};

use tokio::{
    runtime::{Handle, Runtime},
    task::JoinHandle,
};

/// A wrapper around [`Runtime`] that shuts the runtime down in the background
/// when dropped.
///
/// Dropping a runtime inside another runtime is not allowed, this wrapper
/// makes the owning handle droppable from async context.
pub struct BackgroundShutdownRuntime(ManuallyDrop<Runtime>);

impl Debug for BackgroundShutdownRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BackgroundShutdownRuntime").finish()
    }
}

impl Drop for BackgroundShutdownRuntime {
    fn drop(&mut self) {
        // Safety: The runtime is only dropped once here.
        let runtime = unsafe { ManuallyDrop::take(&mut self.0) };
        runtime.shutdown_background();
    }
}

impl Deref for BackgroundShutdownRuntime {
    type Target = Runtime;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Runtime> for BackgroundShutdownRuntime {
    fn from(runtime: Runtime) -> Self {
        Self(ManuallyDrop::new(runtime))
    }
}

/// Where the balancer spawns its background tasks.
///
/// The balancer either borrows an existing runtime through its [`Handle`] or
/// owns a dedicated one. An owned runtime lives as long as the balancer and is
/// shut down in the background when the last handle drops.
#[derive(Debug, Clone)]
pub enum Spawner {
    /// Spawn onto an existing runtime.
    Handle(Handle),
    /// Spawn onto a dedicated runtime owned by the balancer.
    Runtime(Arc<BackgroundShutdownRuntime>),
}

impl Spawner {
    /// The spawner of the current tokio runtime, if called within one.
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::Handle)
    }

    /// Spawns a future onto the underlying runtime.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match self {
            Self::Handle(handle) => handle.spawn(future),
            Self::Runtime(runtime) => runtime.spawn(future),
        }
    }
}

impl From<Handle> for Spawner {
    fn from(handle: Handle) -> Self {
        Self::Handle(handle)
    }
}

impl From<Runtime> for Spawner {
    fn from(runtime: Runtime) -> Self {
        Self::Runtime(Arc::new(runtime.into()))
    }
}

impl From<Arc<BackgroundShutdownRuntime>> for Spawner {
    fn from(runtime: Arc<BackgroundShutdownRuntime>) -> Self {
        Self::Runtime(runtime)
    }
}
