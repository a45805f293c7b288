use std::sync::Arc;

use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::msg::{WrappedRequest, WrappedResponse};

/// A two-phase call interceptor, applied symmetrically on clients and
/// servers.
///
/// The forward phase runs in registration order before the transition (the
/// send on a client, the handler on a server). Returning an error, or
/// populating `wres` before returning, skips the remaining forward phase and
/// the transition. The backward phase then unwinds in reverse order over the
/// middlewares whose forward phase ran, each seeing the error propagated
/// from below and able to replace it.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn forward(
        &self,
        ctx: &mut CallContext,
        wreq: &mut WrappedRequest,
        wres: &mut WrappedResponse,
    ) -> Result<()>;

    async fn backward(
        &self,
        ctx: &mut CallContext,
        wres: &mut WrappedResponse,
        err: Option<Error>,
    ) -> Option<Error> {
        let _ = (ctx, wres);
        err
    }
}

/// Outcome of the forward phase: how many middlewares ran and whether the
/// transition should be skipped.
pub(crate) struct ForwardOutcome {
    pub ran: usize,
    pub cause: Option<Error>,
    pub bypassed: bool,
}

impl ForwardOutcome {
    pub(crate) fn proceed(&self, total: usize) -> bool {
        self.cause.is_none() && !self.bypassed && self.ran == total
    }
}

pub(crate) async fn run_forward(
    middlewares: &[Arc<dyn Middleware>],
    ctx: &mut CallContext,
    wreq: &mut WrappedRequest,
    wres: &mut WrappedResponse,
) -> ForwardOutcome {
    let mut outcome = ForwardOutcome {
        ran: 0,
        cause: None,
        bypassed: false,
    };
    for middleware in middlewares {
        match middleware.forward(ctx, wreq, wres).await {
            Ok(()) => {
                outcome.ran += 1;
                if wres.is_populated() {
                    outcome.bypassed = true;
                    break;
                }
            }
            Err(err) => {
                outcome.ran += 1;
                outcome.cause = Some(err);
                break;
            }
        }
    }
    outcome
}

/// Unwinds the backward phase in strict reverse order over the first `ran`
/// middlewares, threading the propagating error through each.
pub(crate) async fn run_backward(
    middlewares: &[Arc<dyn Middleware>],
    ran: usize,
    ctx: &mut CallContext,
    wres: &mut WrappedResponse,
    mut cause: Option<Error>,
) -> Option<Error> {
    for middleware in middlewares[..ran].iter().rev() {
        cause = middleware.backward(ctx, wres, cause).await;
    }
    cause
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ChannelInfo;
    use crate::error::ErrorKind;
    use crate::schema::Value;
    use crate::service::Service;
    use std::sync::Mutex;

    struct Tracing {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_forward: bool,
        populate: bool,
    }

    #[async_trait]
    impl Middleware for Tracing {
        async fn forward(
            &self,
            _ctx: &mut CallContext,
            _wreq: &mut WrappedRequest,
            wres: &mut WrappedResponse,
        ) -> Result<()> {
            self.log.lock().unwrap().push(format!("fwd:{}", self.tag));
            if self.fail_forward {
                return Err(Error::new(ErrorKind::InvalidArgument, self.tag.into()));
            }
            if self.populate {
                wres.response = Some(Value::String("short-circuit".into()));
            }
            Ok(())
        }

        async fn backward(
            &self,
            _ctx: &mut CallContext,
            _wres: &mut WrappedResponse,
            err: Option<Error>,
        ) -> Option<Error> {
            self.log.lock().unwrap().push(format!("bwd:{}", self.tag));
            err
        }
    }

    fn fixture() -> (CallContext, WrappedRequest, WrappedResponse) {
        let svc = Service::from_json(
            r#"{"protocol":"T","messages":{"noop":{"request":[],"response":"string"}}}"#,
        )
        .unwrap();
        let msg = svc.message("noop").unwrap();
        (
            CallContext::new(msg.clone(), ChannelInfo::default()),
            WrappedRequest::new(msg, Value::Record(vec![])),
            WrappedResponse::default(),
        )
    }

    fn chain(
        log: &Arc<Mutex<Vec<String>>>,
        tags: &[&'static str],
    ) -> Vec<Arc<dyn Middleware>> {
        tags.iter()
            .map(|&tag| {
                Arc::new(Tracing {
                    tag,
                    log: log.clone(),
                    fail_forward: false,
                    populate: false,
                }) as Arc<dyn Middleware>
            })
            .collect()
    }

    #[tokio::test]
    async fn test_ordering() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let middlewares = chain(&log, &["m1", "m2", "m3"]);
        let (mut ctx, mut wreq, mut wres) = fixture();

        let outcome = run_forward(&middlewares, &mut ctx, &mut wreq, &mut wres).await;
        assert!(outcome.proceed(middlewares.len()));
        log.lock().unwrap().push("transition".into());
        let cause = run_backward(&middlewares, outcome.ran, &mut ctx, &mut wres, None).await;
        assert!(cause.is_none());

        assert_eq!(
            *log.lock().unwrap(),
            ["fwd:m1", "fwd:m2", "fwd:m3", "transition", "bwd:m3", "bwd:m2", "bwd:m1"]
        );
    }

    #[tokio::test]
    async fn test_bypass_skips_rest_and_transition() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(Tracing { tag: "m1", log: log.clone(), fail_forward: false, populate: false }),
            Arc::new(Tracing { tag: "m2", log: log.clone(), fail_forward: false, populate: true }),
            Arc::new(Tracing { tag: "m3", log: log.clone(), fail_forward: false, populate: false }),
        ];
        let (mut ctx, mut wreq, mut wres) = fixture();

        let outcome = run_forward(&middlewares, &mut ctx, &mut wreq, &mut wres).await;
        assert!(!outcome.proceed(middlewares.len()));
        assert!(outcome.bypassed);
        let cause = run_backward(&middlewares, outcome.ran, &mut ctx, &mut wres, None).await;
        assert!(cause.is_none());
        assert_eq!(wres.response, Some(Value::String("short-circuit".into())));

        // m3 and the transition never ran; b2 and b1 still unwound
        assert_eq!(*log.lock().unwrap(), ["fwd:m1", "fwd:m2", "bwd:m2", "bwd:m1"]);
    }

    #[tokio::test]
    async fn test_forward_error_enters_backward() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(Tracing { tag: "m1", log: log.clone(), fail_forward: false, populate: false }),
            Arc::new(Tracing { tag: "m2", log: log.clone(), fail_forward: true, populate: false }),
        ];
        let (mut ctx, mut wreq, mut wres) = fixture();

        let outcome = run_forward(&middlewares, &mut ctx, &mut wreq, &mut wres).await;
        assert!(!outcome.proceed(middlewares.len()));
        let cause = run_backward(&middlewares, outcome.ran, &mut ctx, &mut wres, outcome.cause).await;
        assert_eq!(cause.unwrap().msg, "m2");
        assert_eq!(*log.lock().unwrap(), ["fwd:m1", "fwd:m2", "bwd:m2", "bwd:m1"]);
    }

    #[tokio::test]
    async fn test_backward_replaces_error() {
        struct Replacer;
        #[async_trait]
        impl Middleware for Replacer {
            async fn forward(
                &self,
                _ctx: &mut CallContext,
                _wreq: &mut WrappedRequest,
                _wres: &mut WrappedResponse,
            ) -> Result<()> {
                Ok(())
            }
            async fn backward(
                &self,
                _ctx: &mut CallContext,
                _wres: &mut WrappedResponse,
                _err: Option<Error>,
            ) -> Option<Error> {
                Some(Error::new(ErrorKind::InternalServerError, "replaced".into()))
            }
        }

        let middlewares: Vec<Arc<dyn Middleware>> = vec![Arc::new(Replacer)];
        let (mut ctx, mut wreq, mut wres) = fixture();
        let outcome = run_forward(&middlewares, &mut ctx, &mut wreq, &mut wres).await;
        let cause = run_backward(&middlewares, outcome.ran, &mut ctx, &mut wres, None).await;
        assert_eq!(cause.unwrap().msg, "replaced");
    }
}
