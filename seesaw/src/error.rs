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

/// Balancer error.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid balancer configuration.
    #[error("config error: {0}")]
    Config(String),
    /// A balancer task failed to join at close.
    #[error("join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Balancer result.
pub type Result<T> = std::result::Result<T, Error>;
