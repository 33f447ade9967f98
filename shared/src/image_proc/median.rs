//! 3×3 median filter for suppressing isolated hot and dead pixels

use ndarray::{Array2, ArrayView2, Zip};

// Reflect indices for edge handling: -1 -> 0, n -> n - 1
fn reflect_index(idx: isize, size: isize) -> usize {
    if idx < 0 {
        (-idx - 1) as usize
    } else if idx >= size {
        (2 * size - idx - 1) as usize
    } else {
        idx as usize
    }
}

/// Apply a 3×3 median filter with reflected edges
///
/// Each output pixel is the median of its 3×3 neighbourhood; neighbours that
/// fall outside the frame mirror back across the edge (the edge pixel itself
/// is repeated). Rows are processed in parallel.
pub fn median_filter_3x3(image: &ArrayView2<u16>) -> Array2<u16> {
    let (rows, cols) = image.dim();
    let mut output = Array2::<u16>::zeros((rows, cols));
    if rows == 0 || cols == 0 {
        return output;
    }

    Zip::indexed(&mut output).par_for_each(|(i, j), out| {
        let mut window = [0u16; 9];
        let mut k = 0;
        for di in -1isize..=1 {
            let ii = reflect_index(i as isize + di, rows as isize);
            for dj in -1isize..=1 {
                let jj = reflect_index(j as isize + dj, cols as isize);
                window[k] = image[[ii, jj]];
                k += 1;
            }
        }
        let (_, median, _) = window.select_nth_unstable(4);
        *out = *median;
    });

    output
}
