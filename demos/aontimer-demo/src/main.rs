// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A watchdog-style periodic demo: a "bark" event watcher stands in for the
//! original's external interrupt controller notification, and a periodic
//! timer stands in for the sleep-then-feed loop that resets it.

use anyhow::Context as _;
use evloop_core::{Context, EventMask, RunFlags};
use evloop_runtime::isr::simulate_isr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const FEEDS_BEFORE_EXIT: u32 = 3;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    tracing::info!("Restarted...");

    let ctx = Arc::new(Context::default());
    let feeds = Arc::new(AtomicU32::new(0));

    let bark_id = ctx
        .event_init(|_, _| tracing::warn!("Bark!"))
        .context("initializing the bark event watcher")?;

    {
        let ctx = Arc::clone(&ctx);
        let feeds = Arc::clone(&feeds);
        let feed_id = ctx
            .timer_init(move |_, events| {
                assert_eq!(events, EventMask::READ);
                tracing::info!("Feeding...");
                if feeds.fetch_add(1, Ordering::AcqRel) + 1 >= FEEDS_BEFORE_EXIT {
                    ctx.exit().expect("exit never fails for a quiesced context");
                }
            })
            .context("initializing the feed timer")?;
        ctx.timer_set(feed_id, 0, 200)
            .context("arming the feed timer")?;
        ctx.timer_start(feed_id).context("starting the feed timer")?;
    }

    {
        let ctx = Arc::clone(&ctx);
        simulate_isr(move || {
            std::thread::sleep(std::time::Duration::from_millis(450));
            let _ = ctx.event_post(bark_id);
        });
    }

    ctx.run(RunFlags::empty())
        .context("running the dispatch loop")?;
    tracing::info!("Exiting now!");
    Ok(())
}
