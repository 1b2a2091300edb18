//! Read-only lookups into the user, course and purchase collections owned by
//! the account and catalog subsystems.

use sqlx::SqlitePool;

use crate::db::models::{CourseRow, EnrollmentRow, UserRow};

pub async fn get_user(pool: &SqlitePool, id: &str) -> Result<Option<UserRow>, sqlx::Error> {
    sqlx::query_as::<_, UserRow>("SELECT id, display_name, role FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn get_course(pool: &SqlitePool, id: &str) -> Result<Option<CourseRow>, sqlx::Error> {
    sqlx::query_as::<_, CourseRow>("SELECT id, title, tutor_id FROM courses WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Every (course, student) pair with a completed purchase of one of the tutor's courses.
pub async fn completed_enrollments_for_tutor(
    pool: &SqlitePool,
    tutor_id: &str,
) -> Result<Vec<EnrollmentRow>, sqlx::Error> {
    sqlx::query_as::<_, EnrollmentRow>(
        "SELECT DISTINCT p.course_id, p.student_id FROM purchases p \
         JOIN courses c ON c.id = p.course_id \
         WHERE c.tutor_id = ? AND p.status = 'completed'",
    )
    .bind(tutor_id)
    .fetch_all(pool)
    .await
}
