use super::sendmail::send_email;

/// Deliver a job-completion confirmation code to the poster. This is the
/// only channel the plaintext code travels on.
pub async fn send_confirmation_code_email(
    to_email: &str,
    poster_name: &str,
    job_title: &str,
    code: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let subject = format!("Completion code for \"{}\"", job_title);
    let html_body = format!(
        r#"<div style="font-family: sans-serif; max-width: 480px;">
  <h2>Hi {poster_name},</h2>
  <p>Your worker has marked <strong>{job_title}</strong> as done.</p>
  <p>Once you are happy with the work, confirm completion with this code:</p>
  <p style="font-size: 28px; letter-spacing: 6px; font-weight: bold;">{code}</p>
  <p>Entering the code releases the payment. Do not share it before the
  work is finished.</p>
</div>"#
    );

    send_email(to_email, &subject, &html_body).await
}
