//! Request/response modules (auth, redirects, cookies and the like plug in
//! here).

use crate::base::neterror::NetError;
use crate::connection::Connection;
use crate::http::head::ResponseHead;
use crate::http::request::Request;
use crate::http::response::Response;
use std::fmt;
use std::sync::Arc;

/// What a module wants done with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Hand the request to the next module.
    Continue,
    /// Run the pipeline again from the first module.
    Restart,
    /// Skip the remaining modules and send now.
    ShortCircuit,
    /// Don't send; the module put a response in the slot.
    Respond,
    /// Move to the connection set with [`Request::set_connection`] and run
    /// its pipeline from the start.
    NewConnectionRestart,
    /// Move to the connection set with [`Request::set_connection`] and send
    /// without running its modules.
    NewConnectionSend,
}

/// What a module wants done after seeing a response head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    Continue,
    /// Send the request again (e.g. after adding credentials).
    Resend,
}

/// A cross-cutting request/response hook.
pub trait Module: Send + Sync + fmt::Debug {
    fn request_handler(&self, req: &mut Request, response: &mut Option<Response>) -> RequestOutcome {
        let _ = (req, response);
        RequestOutcome::Continue
    }

    fn response_handler(&self, req: &mut Request, head: &ResponseHead) -> ResponseOutcome {
        let _ = (req, head);
        ResponseOutcome::Continue
    }
}

/// Result of running the request handlers.
#[derive(Debug)]
pub(crate) enum Dispatch {
    Send,
    Respond(Response),
    Switch { connection: Connection, restart: bool },
}

/// Run `modules` over `req`. Restarts are capped at `max_restarts`.
pub(crate) fn run_request_handlers(
    modules: &[Arc<dyn Module>],
    req: &mut Request,
    max_restarts: usize,
) -> Result<Dispatch, NetError> {
    let mut restarts = 0;
    let mut idx = 0;
    let mut slot = None;

    while let Some(module) = modules.get(idx) {
        let outcome = module.request_handler(req, &mut slot);
        let internal = req.is_internal_subrequest();
        match outcome {
            RequestOutcome::Continue => idx += 1,
            RequestOutcome::Restart => {
                restarts += 1;
                if restarts > max_restarts {
                    tracing::error!(restarts, module = ?module, "module pipeline restarted too often");
                    return Err(NetError::TooManyModuleRestarts);
                }
                idx = 0;
            }
            RequestOutcome::ShortCircuit => break,
            _ if internal => return Ok(Dispatch::Send),
            RequestOutcome::Respond => {
                let response = slot.take().ok_or(NetError::InvalidModuleOutcome)?;
                return Ok(Dispatch::Respond(response));
            }
            RequestOutcome::NewConnectionRestart | RequestOutcome::NewConnectionSend => {
                let connection = req.take_connection().ok_or(NetError::InvalidModuleOutcome)?;
                return Ok(Dispatch::Switch {
                    connection,
                    restart: outcome == RequestOutcome::NewConnectionRestart,
                });
            }
        }
    }
    Ok(Dispatch::Send)
}

/// Run the response handlers; the first `Resend` wins.
pub(crate) fn run_response_handlers(
    modules: &[Arc<dyn Module>],
    req: &mut Request,
    head: &ResponseHead,
) -> ResponseOutcome {
    for module in modules {
        if module.response_handler(req, head) == ResponseOutcome::Resend {
            return ResponseOutcome::Resend;
        }
    }
    ResponseOutcome::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::version::ProtocolVersion;
    use bytes::Bytes;
    use http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Fixed(RequestOutcome);

    impl Module for Fixed {
        fn request_handler(&self, _: &mut Request, _: &mut Option<Response>) -> RequestOutcome {
            self.0
        }
    }

    #[derive(Debug, Default)]
    struct RestartOnce(AtomicUsize);

    impl Module for RestartOnce {
        fn request_handler(&self, req: &mut Request, _: &mut Option<Response>) -> RequestOutcome {
            if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                req.headers_mut().insert("X-Restarted", "1").unwrap();
                RequestOutcome::Restart
            } else {
                RequestOutcome::Continue
            }
        }
    }

    #[derive(Debug)]
    struct Canned;

    impl Module for Canned {
        fn request_handler(&self, _: &mut Request, slot: &mut Option<Response>) -> RequestOutcome {
            let head = ResponseHead::new(ProtocolVersion::HTTP_1_1, StatusCode::NOT_MODIFIED);
            *slot = Some(Response::ready(head, Bytes::new()));
            RequestOutcome::Respond
        }
    }

    #[test]
    fn test_empty_pipeline_sends() {
        let mut req = Request::get("/");
        assert!(matches!(
            run_request_handlers(&[], &mut req, 100).unwrap(),
            Dispatch::Send
        ));
    }

    #[test]
    fn test_restart_runs_from_first_module() {
        let counter: Arc<dyn Module> = Arc::new(RestartOnce::default());
        let modules = vec![counter];
        let mut req = Request::get("/");
        assert!(matches!(
            run_request_handlers(&modules, &mut req, 100).unwrap(),
            Dispatch::Send
        ));
        assert_eq!(req.headers().get("x-restarted"), Some("1"));
    }

    #[test]
    fn test_restart_cap() {
        let modules: Vec<Arc<dyn Module>> = vec![Arc::new(Fixed(RequestOutcome::Restart))];
        let mut req = Request::get("/");
        assert_eq!(
            run_request_handlers(&modules, &mut req, 5).err(),
            Some(NetError::TooManyModuleRestarts)
        );
    }

    #[test]
    fn test_short_circuit_skips_rest() {
        let modules: Vec<Arc<dyn Module>> = vec![
            Arc::new(Fixed(RequestOutcome::ShortCircuit)),
            Arc::new(Fixed(RequestOutcome::Respond)),
        ];
        let mut req = Request::get("/");
        assert!(matches!(
            run_request_handlers(&modules, &mut req, 100).unwrap(),
            Dispatch::Send
        ));
    }

    #[test]
    fn test_respond_requires_response() {
        let modules: Vec<Arc<dyn Module>> = vec![Arc::new(Fixed(RequestOutcome::Respond))];
        let mut req = Request::get("/");
        assert_eq!(
            run_request_handlers(&modules, &mut req, 100).err(),
            Some(NetError::InvalidModuleOutcome)
        );

        let modules: Vec<Arc<dyn Module>> = vec![Arc::new(Canned)];
        assert!(matches!(
            run_request_handlers(&modules, &mut req, 100).unwrap(),
            Dispatch::Respond(_)
        ));
    }

    #[test]
    fn test_switch_requires_connection() {
        let modules: Vec<Arc<dyn Module>> =
            vec![Arc::new(Fixed(RequestOutcome::NewConnectionSend))];
        let mut req = Request::get("/");
        assert_eq!(
            run_request_handlers(&modules, &mut req, 100).err(),
            Some(NetError::InvalidModuleOutcome)
        );
    }

    #[test]
    fn test_internal_subrequest_ignores_respond() {
        let modules: Vec<Arc<dyn Module>> = vec![Arc::new(Canned)];
        let mut req = Request::connect("example.com:443".to_string());
        assert!(matches!(
            run_request_handlers(&modules, &mut req, 100).unwrap(),
            Dispatch::Send
        ));
    }
}
