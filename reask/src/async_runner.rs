//! Non-blocking variant of the iteration loop.
//!
//! Only the Calling step awaits; parsing, validation and reask construction
//! run inline. Dropping the returned future between attempts records the
//! call as cancelled with the attempts made so far.

use anyhow::{Result, anyhow};
use tracing::Instrument;

use crate::context::CallContext;
use crate::core::history::ValidationOutcome;
use crate::io::model::AsyncModel;
use crate::runner::{Driver, RunRequest, Runner, Step};

impl Runner<'_> {
    pub async fn run_async<M: AsyncModel>(
        &self,
        model: Option<&M>,
        request: RunRequest,
        ctx: &CallContext,
    ) -> Result<ValidationOutcome> {
        let span = ctx.span.clone();
        async move {
            let mut driver =
                Driver::begin(self, request, ctx, model.map(|m| m.name().to_string()))?;
            loop {
                match driver.step() {
                    Step::Done => break,
                    Step::Supplied(raw) => driver.record_output(raw)?,
                    Step::Call(request) => {
                        let raw = match model {
                            Some(model) => model.complete(&request).await,
                            None => Err(anyhow!("no model available for reask")),
                        };
                        match raw {
                            Ok(raw) => driver.record_output(raw)?,
                            Err(err) => return Err(driver.fail(err)),
                        }
                    }
                }
            }
            driver.finish()
        }
        .instrument(span)
        .await
    }
}
