/// Git metadata captured at build time.
pub(crate) struct BuildInfo {
    pub commit_sha1: Option<&'static str>,
    pub git_dirty: bool,
}

pub(crate) const BUILD_INFO: BuildInfo = BuildInfo {
    commit_sha1: option_env!("VERGEN_GIT_SHA"),
    git_dirty: is_true(option_env!("VERGEN_GIT_DIRTY")),
};

const fn is_true(value: Option<&str>) -> bool {
    let Some(value) = value else {
        return false;
    };
    let (value, expected) = (value.as_bytes(), b"true");
    if value.len() != expected.len() {
        return false;
    }
    let mut i = 0;
    while i < expected.len() {
        if value[i] != expected[i] {
            return false;
        }
        i += 1;
    }
    true
}
