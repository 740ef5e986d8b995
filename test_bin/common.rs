use parstream_core::engine::QueryEngine;
use parstream_rt_native::runtime::ThreadedNativeExecutor;

/// Create an engine on a new thread pool with the given settings applied.
pub fn new_engine(threads: usize, settings: &[(&str, &str)]) -> QueryEngine<ThreadedNativeExecutor> {
    logutil::configure_test_logger();

    let runtime = ThreadedNativeExecutor::try_new_with_num_threads(threads).unwrap();
    let mut engine = QueryEngine::new(runtime);
    for (name, value) in settings {
        engine.config_mut().set_from_str(name, value).unwrap();
    }
    engine
}
