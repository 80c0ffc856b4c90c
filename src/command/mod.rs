// SPDX-FileCopyrightText: 2025 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

use crate::{error::Result, Globals};

pub(crate) mod channels;
pub(crate) mod watch;

#[async_trait]
pub(crate) trait Command {
    async fn execute(self, globals: Globals) -> Result<()>;
}
