use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod linux;
        #[allow(unused_imports)]
        pub use self::linux::*;
    } else {
        mod not_supported;
        #[allow(unused_imports)]
        pub use self::not_supported::*;
    }
}
