pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use approx::{abs_diff_eq, assert_abs_diff_eq};
pub use bbox::{prelude::*, CxCyWH, Transform, WH};
pub use indexmap::IndexMap;
pub use itertools::{iproduct, izip, Itertools as _};
pub use label::{Label, Vocabulary};
pub use log::{debug, info, warn};
pub use ndarray::{Array3, ArrayView3, ArrayView4, ArrayViewMut3, ArrayViewMut4, Axis};
pub use noisy_float::prelude::*;
pub use rayon::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    collections::HashSet,
    fs,
    io::{self, prelude::*, BufReader},
    iter,
    path::Path,
    sync::{
        atomic::{self, AtomicBool},
        Arc,
    },
    thread::{self, JoinHandle},
};
