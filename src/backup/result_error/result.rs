use crate::backup::result_error::error::Error;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use std::fmt::Debug;

pub type Result<T> = std::result::Result<T, Error>;

impl<S: Into<String>, O: Debug + Send + 'static, R> WithDebugObjectAndFnName<S, O> for Result<R> {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        self.map_err(|e| e.with_debug_object_and_fn_name(obj, fn_name))
    }
}

impl<R, S: Into<String>> WithMsg<S> for Result<R> {
    fn with_msg(self, msg: S) -> Self {
        self.map_err(|e| e.with_msg(msg))
    }
}

/// Collapses the results of sibling tasks into one. Every sibling has
/// already finished, so all of their errors are reported together.
pub fn collect_results<T, I: IntoIterator<Item = Result<T>>>(results: I) -> Result<Vec<T>> {
    let (oks, errors): (Vec<_>, Vec<_>) = results.into_iter().partition(|r| r.is_ok());
    if errors.is_empty() {
        Ok(oks.into_iter().flatten().collect())
    } else {
        Err(errors.into_iter().filter_map(|r| r.err()).collect::<Vec<_>>().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_results_all_ok() {
        let results: Vec<Result<bool>> = vec![Ok(true), Ok(false)];
        assert_eq!(collect_results(results).unwrap(), vec![true, false]);
    }

    #[test]
    fn test_collect_results_keeps_every_error() {
        let results: Vec<Result<bool>> = vec![
            Ok(true),
            Err(Error::UnknownLocation("a".into())),
            Err(Error::UnknownLocation("b".into())),
        ];
        match collect_results(results) {
            Err(Error::LotsOfError(errors)) => assert_eq!(errors.len(), 2),
            _ => panic!("Expected LotsOfError"),
        }
    }

    #[test]
    fn test_with_msg_on_result() {
        let result: Result<()> = Err(Error::HostNotAnalyzed("Backup Server".into()));
        let message = result.with_msg("Probe failed").unwrap_err().to_string();
        assert!(message.starts_with("Probe failed:\n  remote host Backup Server"));
    }
}
