// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Connection handle for the Redis backend.
//!
//! The handle is passed explicitly into every Redis-backed constructor;
//! there is no process-wide singleton connection. Applications typically
//! open one handle at boot and hand it to every structure they create.
//! Structures open their own connection from the handle and keep it for
//! their lifetime.

use std::fmt;

use crate::error::Error;

/// A handle to a Redis server, wrapping a [`redis::Client`].
///
/// Cloning the handle is cheap; all clones point at the same server.
///
/// # Examples
///
/// ```no_run
/// # use probkit::backend::RedisBackend;
/// # use probkit::bloom::RedisBloomFilter;
/// let backend = RedisBackend::open("redis://127.0.0.1/")?;
/// let mut filter = RedisBloomFilter::with_accuracy(&backend, 100_000, 0.01)?;
/// filter.insert(b"John")?;
/// # Ok::<(), probkit::error::Error>(())
/// ```
#[derive(Clone)]
pub struct RedisBackend {
    client: redis::Client,
}

impl RedisBackend {
    /// Opens a handle from a connection URL (`redis://` or `rediss://`).
    ///
    /// The URL is parsed eagerly but no connection is made until a
    /// structure is constructed.
    pub fn open(url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(url)?;
        Ok(RedisBackend { client })
    }

    /// Wraps an already configured [`redis::Client`].
    ///
    /// Use this when the application manages pool sizing, TLS or timeouts
    /// itself; this crate only consumes connections.
    pub fn from_client(client: redis::Client) -> Self {
        RedisBackend { client }
    }

    /// Opens a fresh connection to the server.
    pub(crate) fn connection(&self) -> Result<redis::Connection, Error> {
        Ok(self.client.get_connection()?)
    }
}

impl fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBackend")
            .field("addr", &self.client.get_connection_info().addr)
            .finish()
    }
}

/// Fetches a required field from a metadata hash map.
pub(crate) fn metadata_field(
    map: &std::collections::HashMap<String, String>,
    field: &'static str,
) -> Result<String, Error> {
    map.get(field)
        .cloned()
        .ok_or_else(|| Error::backend(format!("metadata hash is missing field {field}")))
}

/// Fetches and parses a numeric field from a metadata hash map.
pub(crate) fn metadata_u64(
    map: &std::collections::HashMap<String, String>,
    field: &'static str,
) -> Result<u64, Error> {
    metadata_field(map, field)?
        .parse()
        .map_err(|_| Error::backend(format!("metadata field {field} is not an integer")))
}

/// Fetches and parses a float field from a metadata hash map.
pub(crate) fn metadata_f64(
    map: &std::collections::HashMap<String, String>,
    field: &'static str,
) -> Result<f64, Error> {
    metadata_field(map, field)?
        .parse()
        .map_err(|_| Error::backend(format!("metadata field {field} is not a number")))
}
