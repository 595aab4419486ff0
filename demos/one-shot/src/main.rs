// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::Context as _;
use evloop_core::{Context, EventMask, RunFlags};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let ctx = Context::default();
    tracing::info!("Hello world from one-shot demo!");

    let id = ctx
        .timer_init(|_, events| {
            assert_eq!(events, EventMask::READ);
            tracing::info!("timer fired, exiting now!");
        })
        .context("initializing the one-shot timer")?;
    ctx.timer_set(id, 50, 0).context("arming the timer")?;
    ctx.timer_start(id).context("starting the timer")?;

    ctx.run(RunFlags::ONCE).context("running the dispatch loop")?;
    Ok(())
}
