use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_double};
use std::ptr;
use std::time::Duration;

use crate::api::{simulate, Script};
use crate::config::EngineConfig;
use crate::err::{ConfigErr, Error};

unsafe fn to_str<'a>(s: *const c_char) -> Result<&'a str, Error> {
    if s.is_null() {
        return Ok("");
    }
    Ok(CStr::from_ptr(s).to_str()?)
}

fn run(duration: f64, script: &str, config: &str) -> Result<String, Error> {
    let config = if config.is_empty() {
        EngineConfig::default()
    } else {
        EngineConfig::from_json(config)?
    };
    let script = Script::from_json(script)?;
    let duration = Duration::try_from_secs_f64(duration.max(0.0))
        .map_err(|_| ConfigErr::Duration(duration))?;
    let sim = simulate(&config, &script, duration)?;
    Ok(serde_json::to_string(&sim)?)
}

/// Simulate `script` for `duration` seconds, returning the result as JSON.
/// Failures are returned as `{"error": "..."}`. An empty or null `config`
/// selects the defaults.
///
/// # Safety
///
/// `script` and `config` must be null or valid NUL terminated strings. The
/// returned string must be released with `lockstep_free_string`.
#[no_mangle]
pub unsafe extern "C" fn lockstep_simulate(
    duration: c_double,
    script: *const c_char,
    config: *const c_char,
) -> *mut c_char {
    let out = match (to_str(script), to_str(config)) {
        (Ok(script), Ok(config)) => run(duration, script, config),
        (Err(err), _) | (_, Err(err)) => Err(err),
    };
    let json = match out {
        Ok(json) => json,
        Err(err) => serde_json::json!({ "error": err.to_string() }).to_string(),
    };
    match CString::new(json) {
        Ok(s) => s.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// # Safety
///
/// `s` must have been returned by `lockstep_simulate` and not freed before.
#[no_mangle]
pub unsafe extern "C" fn lockstep_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(script: &str, config: &str) -> serde_json::Value {
        let script = CString::new(script).unwrap();
        let config = CString::new(config).unwrap();
        unsafe {
            let out = lockstep_simulate(0.5, script.as_ptr(), config.as_ptr());
            let json = CStr::from_ptr(out).to_str().unwrap().to_owned();
            lockstep_free_string(out);
            serde_json::from_str(&json).unwrap()
        }
    }

    #[test]
    fn test_simulate_json() {
        let out = call("{}", r#"{"frame_rate": 30}"#);
        assert_eq!(out["frame_ticks"], 17);
    }

    #[test]
    fn test_error_json() {
        let out = call("{", "");
        assert!(out["error"].as_str().unwrap().contains("json"));
        let out = call("{}", r#"{"ppq": 0}"#);
        assert!(out["error"].as_str().unwrap().contains("ppq"));
    }

    #[test]
    fn test_unbounded_duration() {
        let script = CString::new("{}").unwrap();
        for &duration in [f64::INFINITY, 1e30].iter() {
            unsafe {
                let out = lockstep_simulate(duration, script.as_ptr(), ptr::null());
                let json = CStr::from_ptr(out).to_str().unwrap().to_owned();
                lockstep_free_string(out);
                let out: serde_json::Value = serde_json::from_str(&json).unwrap();
                assert!(out["error"].as_str().unwrap().contains("duration"));
            }
        }
    }

    #[test]
    fn test_invalid_utf8() {
        let script = CString::new(vec![b'{', 0xff, b'}']).unwrap();
        unsafe {
            let out = lockstep_simulate(0.1, script.as_ptr(), ptr::null());
            let json = CStr::from_ptr(out).to_str().unwrap().to_owned();
            lockstep_free_string(out);
            let out: serde_json::Value = serde_json::from_str(&json).unwrap();
            assert!(out["error"].as_str().unwrap().contains("utf-8"));
        }
    }

    #[test]
    fn test_null_args() {
        unsafe {
            let out = lockstep_simulate(0.0, ptr::null(), ptr::null());
            let json = CStr::from_ptr(out).to_str().unwrap().to_owned();
            lockstep_free_string(out);
            assert!(json.contains("error"));
        }
    }
}
