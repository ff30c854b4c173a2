// Copyright 2026 Daniel Pelikan
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

//! Service record identifiers for the chat service.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Service UUID for the secure (authenticated, encrypted) variant.
pub const SECURE_UUID: Uuid = Uuid::from_u128(0xfa87c0d0_afac_11de_8a39_0800200c9a66);

/// Service UUID for the insecure (unauthenticated) variant.
pub const INSECURE_UUID: Uuid = Uuid::from_u128(0x8ce255c0_200a_11e0_ac64_0800200c9a66);

/// Service record name for the secure variant.
pub const SECURE_NAME: &str = "BluetoothChatSecure";

/// Service record name for the insecure variant.
pub const INSECURE_NAME: &str = "BluetoothChatInsecure";

/// Session read buffer size.
pub const DEFAULT_READ_BUFFER: usize = 1024;

/// Which service record a listening endpoint publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceVariant {
    #[default]
    Secure,
    Insecure,
}

impl ServiceVariant {
    pub fn record(self) -> ServiceRecord {
        match self {
            ServiceVariant::Secure => ServiceRecord::SECURE,
            ServiceVariant::Insecure => ServiceRecord::INSECURE,
        }
    }

    pub fn is_secure(self) -> bool {
        self == ServiceVariant::Secure
    }
}

/// A published service record: name plus UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceRecord {
    pub name: &'static str,
    pub uuid: Uuid,
    pub variant: ServiceVariant,
}

impl ServiceRecord {
    pub const SECURE: ServiceRecord = ServiceRecord {
        name: SECURE_NAME,
        uuid: SECURE_UUID,
        variant: ServiceVariant::Secure,
    };

    pub const INSECURE: ServiceRecord = ServiceRecord {
        name: INSECURE_NAME,
        uuid: INSECURE_UUID,
        variant: ServiceVariant::Insecure,
    };
}

impl fmt::Display for ServiceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.uuid)
    }
}
